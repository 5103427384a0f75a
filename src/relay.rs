//! Dual relay main loop
//!
//! Wires listener, scanner, translator, pool and composers together and owns
//! the relay lifecycle:
//!
//! ```text
//! Created -> Started -> Stopped      (shutdown requested)
//!                    -> Terminated   (upstream subscription lost)
//! ```
//!
//! There is no restart transition. Each received block is handled by its
//! own task, so there is no ordering between the completion of different
//! blocks; consumers re-sequence with the event nonce.

use std::future::Future;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::composer::TxComposer;
use crate::dev::{BlockFactory, DevTriggerGenerator, TriggerSchedule};
use crate::error::RelayError;
use crate::listener::ChainHeadListener;
use crate::metrics::Metrics;
use crate::pool::EventPool;
use crate::ports::{ChainState, HeadSource, TxSubmitter};
use crate::scanner::scan;
use crate::translator::EventTranslator;
use crate::types::{DualEvent, HeadBlock, MonitoredContract, RelayState, Transaction};

/// Dev mode block generation
#[derive(Clone)]
pub struct DevTrigger {
    pub schedule: TriggerSchedule,
    pub factory: BlockFactory,
}

#[derive(Clone)]
pub struct RelayConfig {
    pub monitored: MonitoredContract,
    /// Local account whose nonce stamps each event
    pub dual_state_address: Address,
    pub match_ratio: u64,
    /// Receiver of release transactions on the external chain
    pub release_receiver: Address,
    /// Observe heads without handling blocks
    pub light_node: bool,
    pub dev_trigger: Option<DevTrigger>,
}

/// State, mempool and signer of one chain
#[derive(Clone)]
pub struct ChainEndpoint {
    pub state: Arc<dyn ChainState>,
    pub submitter: Arc<dyn TxSubmitter>,
    pub composer: Arc<TxComposer>,
}

/// Scans one block and relays its monitored transactions
pub struct BlockHandler {
    monitored: MonitoredContract,
    translator: EventTranslator,
    pool: Arc<EventPool>,
    local: ChainEndpoint,
    metrics: Arc<Metrics>,
}

impl BlockHandler {
    /// Handle every monitored transaction of `block` in block order
    ///
    /// Returns the events added to the pool. A state failure aborts the rest
    /// of the block; every other failure skips only its transaction.
    pub async fn handle_block(&self, block: HeadBlock) -> Vec<Arc<DualEvent>> {
        let block_number = block.as_ref().map(|b| b.number);
        let matched = scan(block.as_deref(), &self.monitored);
        self.metrics.blocks_handled.inc();

        let mut added = Vec::new();
        for tx in matched {
            self.metrics.matched_txs.inc();
            match self.relay_tx(tx).await {
                Ok(event) => added.push(event),
                Err(e) if e.is_duplicate() => {
                    self.metrics.record_error(e.kind());
                    info!(
                        block_number = ?block_number,
                        tx_hash = %tx.hash,
                        reason = %e,
                        "Transaction already relayed, skipping"
                    );
                }
                Err(e @ RelayError::StateUnavailable { .. }) => {
                    self.metrics.record_error(e.kind());
                    error!(
                        block_number = ?block_number,
                        tx_hash = %tx.hash,
                        error = %e,
                        "Chain state unavailable, aborting block"
                    );
                    break;
                }
                Err(e) => {
                    self.metrics.record_error(e.kind());
                    error!(
                        block_number = ?block_number,
                        tx_hash = %tx.hash,
                        contract = %self.monitored.address(),
                        error = %e,
                        "Failed to relay transaction"
                    );
                }
            }
        }

        if !added.is_empty() {
            debug!(block_number = ?block_number, events = added.len(), "Block handled");
        }
        added
    }

    async fn relay_tx(&self, tx: &Transaction) -> Result<Arc<DualEvent>, RelayError> {
        if self.pool.contains_source(&tx.hash).await {
            return Err(RelayError::AlreadyRelayed { tx_hash: tx.hash });
        }

        let (event, counterpart) = self.translator.translate(tx).await?;
        let event = self.pool.add_event(event).await?;
        self.metrics.events_added.inc();
        self.metrics.pool_size.set(self.pool.len().await as i64);
        info!(
            event_hash = %event.hash(),
            source_tx = %event.source_tx_hash(),
            nonce = event.nonce(),
            "Dual event added to pool"
        );

        // The event stays pooled on rejection so a later relay pass can retry
        let chain = self.local.composer.chain();
        match self.local.submitter.submit(&counterpart).await {
            Ok(()) => {
                self.metrics.record_submission(chain, true);
                info!(chain, tx_hash = %counterpart.hash(), "Counterpart transaction submitted");
            }
            Err(e) => {
                self.metrics.record_submission(chain, false);
                self.metrics.record_error(e.kind());
                error!(
                    chain,
                    event_hash = %event.hash(),
                    tx_hash = %counterpart.hash(),
                    error = %e,
                    "Counterpart transaction rejected"
                );
            }
        }

        Ok(event)
    }
}

pub struct DualRelay {
    config: RelayConfig,
    handler: Arc<BlockHandler>,
    external: ChainEndpoint,
    pool: Arc<EventPool>,
    metrics: Arc<Metrics>,
    state: watch::Sender<RelayState>,
}

impl DualRelay {
    pub fn new(
        config: RelayConfig,
        local: ChainEndpoint,
        external: ChainEndpoint,
        metrics: Arc<Metrics>,
    ) -> Self {
        let pool = Arc::new(EventPool::new());
        let translator = EventTranslator::new(
            Arc::clone(&local.state),
            Arc::clone(&local.composer),
            config.dual_state_address,
            config.match_ratio,
        );
        let handler = Arc::new(BlockHandler {
            monitored: config.monitored,
            translator,
            pool: Arc::clone(&pool),
            local,
            metrics: Arc::clone(&metrics),
        });
        let (state, _) = watch::channel(RelayState::Created);

        Self {
            config,
            handler,
            external,
            pool,
            metrics,
            state,
        }
    }

    pub fn pool(&self) -> &Arc<EventPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Handle one block outside the main loop
    pub async fn handle_block(&self, block: HeadBlock) -> Vec<Arc<DualEvent>> {
        self.handler.handle_block(block).await
    }

    /// Run the relay until `shutdown` resolves or the upstream is lost
    ///
    /// Returns `Ok` after a requested stop and `UpstreamSubscriptionLost`
    /// when the listener terminates; the relay cannot be started again.
    pub async fn run<F>(&self, source: &dyn HeadSource, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send,
    {
        let started = self.state.send_if_modified(|state| {
            if *state == RelayState::Created {
                *state = RelayState::Started;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(RelayError::AlreadyStarted);
        }

        let (listener, mut blocks) = ChainHeadListener::new(Arc::clone(&self.metrics));

        let dev_task = self.config.dev_trigger.as_ref().map(|trigger| {
            let generator = DevTriggerGenerator::new(
                trigger.schedule.clone(),
                self.config.monitored,
                Arc::clone(&trigger.factory),
            );
            tokio::spawn(generator.run(listener.sender()))
        });

        let mut listener_task = match listener.start(source).await {
            Ok(task) => task,
            Err(e) => {
                if let Some(task) = dev_task {
                    task.abort();
                }
                error!(error = %e, "Failed to subscribe to upstream heads");
                self.state.send_replace(RelayState::Terminated);
                return Err(e);
            }
        };

        info!(
            contract = %self.config.monitored.address(),
            light_node = self.config.light_node,
            dev_mode = self.config.dev_trigger.is_some(),
            "Dual relay started"
        );

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping dual relay");
                    break Ok(());
                }
                joined = &mut listener_task => {
                    break match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(RelayError::UpstreamSubscriptionLost(e.to_string())),
                    };
                }
                Some(block) = blocks.recv() => self.dispatch(block),
            }
        };

        listener_task.abort();
        if let Some(task) = dev_task {
            task.abort();
        }

        match &result {
            Ok(()) => {
                self.state.send_replace(RelayState::Stopped);
                let pool_size = self.pool.len().await;
                info!(pool_size, "Dual relay stopped");
            }
            Err(e) => {
                self.metrics.record_error(e.kind());
                self.state.send_replace(RelayState::Terminated);
                error!(error = %e, "Dual relay terminated, node restart required");
            }
        }
        result
    }

    /// Spawn the handling task for one block
    fn dispatch(&self, block: HeadBlock) {
        if self.config.light_node {
            debug!(block_number = ?block.as_ref().map(|b| b.number), "Light node, block not handled");
            return;
        }
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            handler.handle_block(block).await;
        });
    }

    /// Release `event`'s value on the external chain
    ///
    /// Composes `release(receiver, value)` with the external signer's
    /// current nonce and submits it to the external mempool.
    pub async fn submit_release(&self, event: &DualEvent) -> Result<B256, RelayError> {
        let state = self.external.state.state().await?;
        let tx = self
            .external
            .composer
            .compose_release(
                state.as_ref(),
                event.summary().value,
                self.config.release_receiver,
            )
            .await?;

        let chain = self.external.composer.chain();
        match self.external.submitter.submit(&tx).await {
            Ok(()) => {
                self.metrics.record_submission(chain, true);
                info!(
                    chain,
                    event_hash = %event.hash(),
                    tx_hash = %tx.hash(),
                    "Release transaction submitted"
                );
                Ok(*tx.hash())
            }
            Err(e) => {
                self.metrics.record_submission(chain, false);
                self.metrics.record_error(e.kind());
                warn!(chain, event_hash = %event.hash(), error = %e, "Release transaction rejected");
                Err(e)
            }
        }
    }
}
