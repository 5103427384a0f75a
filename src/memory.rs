//! In-memory collaborators
//!
//! A chain with account nonces and a mempool, plus a head source fed by
//! hand. Dev mode runs on these when no live chain is configured, and the
//! tests drive the whole pipeline through them.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::consensus::{Signed, TxLegacy};
use alloy::primitives::Address;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RelayError;
use crate::ports::{ChainState, HeadPublisher, HeadSource, HeadSubscription, StateSnapshot, TxSubmitter};
use crate::types::ChainHeadEvent;

#[derive(Default)]
struct ChainInner {
    nonces: HashMap<Address, u64>,
    mempool: Vec<Signed<TxLegacy>>,
    unavailable: Option<String>,
    reject: Option<String>,
}

/// Account nonces and mempool of one chain
pub struct MemoryChain {
    tag: String,
    inner: Mutex<ChainInner>,
}

impl MemoryChain {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            inner: Mutex::new(ChainInner::default()),
        }
    }

    pub async fn set_nonce(&self, address: Address, nonce: u64) {
        self.inner.lock().await.nonces.insert(address, nonce);
    }

    /// Make `state()` fail with `reason`, or recover with `None`
    pub async fn set_unavailable(&self, reason: Option<&str>) {
        self.inner.lock().await.unavailable = reason.map(str::to_string);
    }

    /// Make `submit()` reject with `reason`, or accept with `None`
    pub async fn set_rejecting(&self, reason: Option<&str>) {
        self.inner.lock().await.reject = reason.map(str::to_string);
    }

    /// Transactions accepted so far, in submission order
    pub async fn mempool(&self) -> Vec<Signed<TxLegacy>> {
        self.inner.lock().await.mempool.clone()
    }
}

/// Frozen copy of a `MemoryChain`'s nonces
pub struct MemorySnapshot {
    nonces: HashMap<Address, u64>,
}

#[async_trait]
impl StateSnapshot for MemorySnapshot {
    async fn nonce(&self, address: Address) -> Result<u64, RelayError> {
        Ok(self.nonces.get(&address).copied().unwrap_or_default())
    }
}

#[async_trait]
impl ChainState for MemoryChain {
    async fn state(&self) -> Result<Box<dyn StateSnapshot>, RelayError> {
        let inner = self.inner.lock().await;
        if let Some(reason) = &inner.unavailable {
            return Err(RelayError::state_unavailable(&self.tag, reason));
        }
        Ok(Box::new(MemorySnapshot {
            nonces: inner.nonces.clone(),
        }))
    }
}

#[async_trait]
impl TxSubmitter for MemoryChain {
    async fn submit(&self, tx: &Signed<TxLegacy>) -> Result<(), RelayError> {
        let rejected = |reason: String| RelayError::SubmissionRejected {
            chain: self.tag.clone(),
            tx_hash: *tx.hash(),
            reason,
        };

        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.reject {
            return Err(rejected(reason.clone()));
        }

        let sender = tx
            .recover_signer()
            .map_err(|e| rejected(format!("invalid signature: {}", e)))?;
        let expected = inner.nonces.get(&sender).copied().unwrap_or_default();
        let nonce = tx.tx().nonce;
        if nonce < expected {
            return Err(rejected(format!(
                "nonce too low: expected {}, got {}",
                expected, nonce
            )));
        }

        inner.nonces.insert(sender, nonce + 1);
        inner.mempool.push(tx.clone());
        debug!(chain = %self.tag, tx_hash = %tx.hash(), sender = %sender, "Transaction accepted");
        Ok(())
    }
}

/// Head source whose notifications are pushed by the caller
#[derive(Default)]
pub struct MemoryHeadSource {
    publisher: Mutex<Option<HeadPublisher>>,
}

impl MemoryHeadSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Push a notification; false if nobody is subscribed
    pub async fn publish(&self, event: ChainHeadEvent) -> bool {
        match self.publisher.lock().await.as_ref() {
            Some(publisher) => publisher.publish(event).await,
            None => false,
        }
    }

    /// Fail the current subscription
    pub async fn fail(&self, reason: &str) {
        if let Some(publisher) = self.publisher.lock().await.take() {
            publisher.fail(reason);
        }
    }
}

#[async_trait]
impl HeadSource for MemoryHeadSource {
    async fn subscribe(&self) -> Result<HeadSubscription, RelayError> {
        let (subscription, publisher) = HeadSubscription::channel();
        *self.publisher.lock().await = Some(publisher);
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_is_frozen() {
        let chain = MemoryChain::new("KARDIA");
        let addr = Address::repeat_byte(0x01);
        chain.set_nonce(addr, 3).await;

        let snapshot = chain.state().await.unwrap();
        chain.set_nonce(addr, 4).await;

        assert_eq!(snapshot.nonce(addr).await.unwrap(), 3);
        assert_eq!(chain.state().await.unwrap().nonce(addr).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_unavailable_state() {
        let chain = MemoryChain::new("ETH");
        chain.set_unavailable(Some("syncing")).await;
        assert!(matches!(
            chain.state().await,
            Err(RelayError::StateUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscriber() {
        let source = MemoryHeadSource::new();
        assert!(!source.publish(ChainHeadEvent::empty()).await);
    }
}
