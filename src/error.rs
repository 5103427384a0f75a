//! Error types for the dual relay

use alloy::primitives::B256;
use thiserror::Error;

/// Call data could not be mapped onto the bridge contract interface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Call data too short for a method selector: {len} bytes")]
    TooShort { len: usize },

    #[error("Unknown method selector: 0x{selector}")]
    UnknownSelector { selector: String },

    #[error("Invalid arguments for {method}: {reason}")]
    InvalidArguments { method: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Chain state unavailable on {chain}: {reason}")]
    StateUnavailable { chain: String, reason: String },

    // ========================================================================
    // Event Pool
    // ========================================================================
    #[error("Duplicate event: {hash}")]
    DuplicateEvent { hash: B256 },

    #[error("Source transaction already relayed: {tx_hash}")]
    AlreadyRelayed { tx_hash: B256 },

    // ========================================================================
    // Counterpart submission
    // ========================================================================
    #[error("Transaction {tx_hash} rejected by {chain} mempool: {reason}")]
    SubmissionRejected {
        chain: String,
        tx_hash: B256,
        reason: String,
    },

    #[error("Signing failed: {0}")]
    Signing(String),

    // ========================================================================
    // Lifecycle
    // ========================================================================
    #[error("Upstream head subscription lost: {0}")]
    UpstreamSubscriptionLost(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Relay already started")]
    AlreadyStarted,
}

impl RelayError {
    pub fn state_unavailable(chain: &str, reason: impl ToString) -> Self {
        RelayError::StateUnavailable {
            chain: chain.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Duplicates are informational: the event is already queued
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            RelayError::DuplicateEvent { .. } | RelayError::AlreadyRelayed { .. }
        )
    }

    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Decode(_) => "decode",
            RelayError::StateUnavailable { .. } => "state_unavailable",
            RelayError::DuplicateEvent { .. } => "duplicate_event",
            RelayError::AlreadyRelayed { .. } => "already_relayed",
            RelayError::SubmissionRejected { .. } => "submission_rejected",
            RelayError::Signing(_) => "signing",
            RelayError::UpstreamSubscriptionLost(_) => "upstream_lost",
            RelayError::Config(_) => "config",
            RelayError::AlreadyStarted => "already_started",
        }
    }
}
