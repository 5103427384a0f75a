//! Chain Head Listener
//!
//! Subscribes once to the upstream head stream and forwards each head's
//! block into a single-slot channel. When the slot is still occupied the new
//! block is dropped: the relay only needs the latest head, and the upstream
//! must never wait on a slow consumer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::ports::{HeadSource, HeadSubscription};
use crate::types::{ChainHeadEvent, HeadBlock};

/// Capacity of the block channel. Fixed: the drop-not-block contract
/// depends on it.
pub const BLOCK_SLOT_SIZE: usize = 1;

/// Outcome of forwarding one head notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Sent,
    /// Slot already held an unconsumed block
    Dropped,
    /// Consumer side of the slot is gone
    Closed,
}

pub struct ChainHeadListener {
    slot: mpsc::Sender<HeadBlock>,
    metrics: Arc<Metrics>,
}

impl ChainHeadListener {
    /// Create a listener together with the receiving end of its block slot
    pub fn new(metrics: Arc<Metrics>) -> (Self, mpsc::Receiver<HeadBlock>) {
        let (slot, blocks) = mpsc::channel(BLOCK_SLOT_SIZE);
        (Self { slot, metrics }, blocks)
    }

    /// Another producer handle on the same slot (used by the dev generator)
    pub fn sender(&self) -> mpsc::Sender<HeadBlock> {
        self.slot.clone()
    }

    /// Non-blocking forwarding step
    pub fn forward(&self, head: ChainHeadEvent) -> Forwarded {
        let number = head.block.as_ref().map(|b| b.number);
        if let Some(number) = number {
            self.metrics.latest_head.set(number as i64);
        }
        self.metrics.heads_received.inc();

        match self.slot.try_send(head.block) {
            Ok(()) => Forwarded::Sent,
            Err(TrySendError::Full(_)) => {
                self.metrics.heads_dropped.inc();
                debug!(block_number = ?number, "Block slot full, dropping head");
                Forwarded::Dropped
            }
            Err(TrySendError::Closed(_)) => Forwarded::Closed,
        }
    }

    /// Subscribe to `source` and spawn the forwarding loop
    ///
    /// The task resolves with `UpstreamSubscriptionLost` when the upstream
    /// errors or closes, and with `Ok` when the consumer goes away.
    pub async fn start(
        self,
        source: &dyn HeadSource,
    ) -> Result<JoinHandle<Result<(), RelayError>>, RelayError> {
        let subscription = source.subscribe().await?;
        info!("Subscribed to upstream chain heads");
        Ok(tokio::spawn(self.run(subscription)))
    }

    async fn run(self, mut subscription: HeadSubscription) -> Result<(), RelayError> {
        loop {
            match subscription.next().await {
                Ok(head) => {
                    if self.forward(head) == Forwarded::Closed {
                        info!("Block consumer closed, listener exiting");
                        return Ok(());
                    }
                }
                Err(reason) => {
                    error!(reason = %reason, "Upstream head subscription lost");
                    return Err(RelayError::UpstreamSubscriptionLost(reason));
                }
            }
        }
    }
}
