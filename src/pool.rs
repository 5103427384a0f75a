//! Event Pool
//!
//! Deduplicating, append-only store of dual events keyed by event hash. It is
//! the only authority on "already seen": callers go through `add_event` and
//! never keep a private copy of the set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::B256;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::error::RelayError;
use crate::types::DualEvent;

/// Buffer of the new-event broadcast channel
const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Default)]
struct PoolInner {
    by_hash: HashMap<B256, Arc<DualEvent>>,
    /// Insertion order, for listing
    order: Vec<B256>,
    /// Source tx hashes of events that came from the external chain
    external_sources: HashSet<B256>,
}

pub struct EventPool {
    inner: RwLock<PoolInner>,
    added: broadcast::Sender<Arc<DualEvent>>,
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPool {
    pub fn new() -> Self {
        let (added, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            inner: RwLock::new(PoolInner::default()),
            added,
        }
    }

    /// Insert `event` unless an event with the same hash, or an external
    /// event for the same source transaction, is already present.
    pub async fn add_event(&self, event: DualEvent) -> Result<Arc<DualEvent>, RelayError> {
        let hash = event.hash();
        let mut inner = self.inner.write().await;

        if inner.by_hash.contains_key(&hash) {
            return Err(RelayError::DuplicateEvent { hash });
        }
        if event.from_external_chain() && inner.external_sources.contains(&event.source_tx_hash())
        {
            return Err(RelayError::AlreadyRelayed {
                tx_hash: event.source_tx_hash(),
            });
        }

        if event.from_external_chain() {
            inner.external_sources.insert(event.source_tx_hash());
        }
        let event = Arc::new(event);
        inner.by_hash.insert(hash, Arc::clone(&event));
        inner.order.push(hash);
        drop(inner);

        // No subscribers is fine
        let _ = self.added.send(Arc::clone(&event));
        debug!(event_hash = %hash, "Event added to pool");
        Ok(event)
    }

    pub async fn contains(&self, hash: &B256) -> bool {
        self.inner.read().await.by_hash.contains_key(hash)
    }

    /// Whether an external-chain event for `tx_hash` is already pooled
    pub async fn contains_source(&self, tx_hash: &B256) -> bool {
        self.inner.read().await.external_sources.contains(tx_hash)
    }

    pub async fn get(&self, hash: &B256) -> Option<Arc<DualEvent>> {
        self.inner.read().await.by_hash.get(hash).cloned()
    }

    /// All events in insertion order
    pub async fn events(&self) -> Vec<Arc<DualEvent>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|hash| inner.by_hash.get(hash).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Receive every event added from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DualEvent>> {
        self.added.subscribe()
    }
}
