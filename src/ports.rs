//! Collaborator interfaces consumed by the relay
//!
//! The relay never locates its collaborators at runtime; each one is injected
//! through one of these traits.

use alloy::consensus::{Signed, TxLegacy};
use alloy::primitives::Address;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::RelayError;
use crate::types::ChainHeadEvent;

/// Buffer of the upstream head notification channel
pub const HEAD_CHANNEL_SIZE: usize = 5;

const STREAM_CLOSED: &str = "head notification stream closed";

/// Upstream source of new canonical head notifications
#[async_trait]
pub trait HeadSource: Send + Sync {
    /// Subscribe once to head notifications
    async fn subscribe(&self) -> Result<HeadSubscription, RelayError>;
}

/// Consumer side of a head subscription
///
/// Dropping it unsubscribes: the publisher observes the closed handle.
pub struct HeadSubscription {
    heads: mpsc::Receiver<ChainHeadEvent>,
    errors: oneshot::Receiver<String>,
    _unsubscribe: oneshot::Sender<()>,
}

/// Producer side of a head subscription, held by the `HeadSource`
pub struct HeadPublisher {
    heads: mpsc::Sender<ChainHeadEvent>,
    errors: Option<oneshot::Sender<String>>,
    unsubscribed: oneshot::Receiver<()>,
}

impl HeadSubscription {
    /// Create a connected subscription/publisher pair
    pub fn channel() -> (HeadSubscription, HeadPublisher) {
        let (heads_tx, heads_rx) = mpsc::channel(HEAD_CHANNEL_SIZE);
        let (errors_tx, errors_rx) = oneshot::channel();
        let (unsubscribe_tx, unsubscribe_rx) = oneshot::channel();
        (
            HeadSubscription {
                heads: heads_rx,
                errors: errors_rx,
                _unsubscribe: unsubscribe_tx,
            },
            HeadPublisher {
                heads: heads_tx,
                errors: Some(errors_tx),
                unsubscribed: unsubscribe_rx,
            },
        )
    }

    /// Wait for the next notification. `Err` carries the reason the
    /// subscription ended: an upstream error or a closed stream.
    pub async fn next(&mut self) -> Result<ChainHeadEvent, String> {
        tokio::select! {
            biased;
            head = self.heads.recv() => match head {
                Some(head) => Ok(head),
                // A failing publisher closes the stream, keep its reason
                None => Err(self
                    .errors
                    .try_recv()
                    .unwrap_or_else(|_| STREAM_CLOSED.to_string())),
            },
            err = &mut self.errors => {
                Err(err.unwrap_or_else(|_| STREAM_CLOSED.to_string()))
            }
        }
    }
}

impl HeadPublisher {
    /// Deliver a notification; returns false once the subscriber is gone
    pub async fn publish(&self, event: ChainHeadEvent) -> bool {
        self.heads.send(event).await.is_ok()
    }

    /// Report a subscription error, ending the subscription
    pub fn fail(mut self, reason: impl Into<String>) {
        if let Some(errors) = self.errors.take() {
            let _ = errors.send(reason.into());
        }
    }

    /// Resolves when the subscriber unsubscribes
    pub async fn unsubscribed(&mut self) {
        let _ = (&mut self.unsubscribed).await;
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.heads.is_closed()
    }
}

/// Point-in-time view of a chain's account state
#[async_trait]
pub trait StateSnapshot: Send + Sync {
    /// Current nonce of `address` in this snapshot
    async fn nonce(&self, address: Address) -> Result<u64, RelayError>;
}

/// Provider of chain state snapshots
#[async_trait]
pub trait ChainState: Send + Sync {
    /// Obtain a consistent snapshot; fails with `StateUnavailable`
    async fn state(&self) -> Result<Box<dyn StateSnapshot>, RelayError>;
}

/// Mempool submission on one chain
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Submit a signed transaction; fails with `SubmissionRejected`
    async fn submit(&self, tx: &Signed<TxLegacy>) -> Result<(), RelayError>;
}
