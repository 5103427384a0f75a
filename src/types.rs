//! Common types for the dual relay
//!
//! Blocks and transactions are the minimal view of the external chain the
//! relay needs; `DualEvent` is the relay's record of one detected cross-chain
//! action and its counterpart-chain follow-up.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;

use crate::hash::dual_event_hash;

/// Chain tag of the external (Ethereum) chain
pub const EXTERNAL_CHAIN: &str = "ETH";

/// Chain tag of the local (Kardia) chain
pub const LOCAL_CHAIN: &str = "KARDIA";

/// A transaction as seen in an external chain block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub hash: B256,
    /// Destination; `None` for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

/// A block of the external chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub transactions: Vec<Transaction>,
}

/// Item carried by the single-slot block channel. Head notifications may
/// arrive without a block, so the payload is optional all the way down.
pub type HeadBlock = Option<Arc<Block>>;

/// New canonical head notification from the upstream chain
#[derive(Debug, Clone, Default)]
pub struct ChainHeadEvent {
    pub block: HeadBlock,
}

impl ChainHeadEvent {
    pub fn new(block: Block) -> Self {
        Self {
            block: Some(Arc::new(block)),
        }
    }

    /// Notification that carries no block payload
    pub fn empty() -> Self {
        Self { block: None }
    }
}

/// The bridge contract address watched on the external chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredContract {
    address: Address,
}

impl MonitoredContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_target_of(&self, tx: &Transaction) -> bool {
        tx.to == Some(self.address)
    }
}

/// Decoded meaning of a matched transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub method: String,
    pub value: U256,
}

/// Forward reference to the transaction expected on the counterpart chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTx {
    pub tx_hash: B256,
    pub target_chain: String,
}

/// Cross-chain event record. Immutable once built; its identity is the
/// digest of all other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DualEvent {
    nonce: u64,
    from_external_chain: bool,
    source_chain: String,
    source_tx_hash: B256,
    summary: EventSummary,
    pending_tx: PendingTx,
    hash: B256,
}

impl DualEvent {
    pub fn new(
        nonce: u64,
        from_external_chain: bool,
        source_chain: impl Into<String>,
        source_tx_hash: B256,
        summary: EventSummary,
        pending_tx: PendingTx,
    ) -> Self {
        let source_chain = source_chain.into();
        let hash = dual_event_hash(
            nonce,
            from_external_chain,
            &source_chain,
            &source_tx_hash,
            &summary,
            &pending_tx,
        );
        Self {
            nonce,
            from_external_chain,
            source_chain,
            source_tx_hash,
            summary,
            pending_tx,
            hash,
        }
    }

    /// Provenance nonce; advisory only, never a uniqueness key
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn from_external_chain(&self) -> bool {
        self.from_external_chain
    }

    pub fn source_chain(&self) -> &str {
        &self.source_chain
    }

    pub fn source_tx_hash(&self) -> B256 {
        self.source_tx_hash
    }

    pub fn summary(&self) -> &EventSummary {
        &self.summary
    }

    pub fn pending_tx(&self) -> &PendingTx {
        &self.pending_tx
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }
}

impl fmt::Display for DualEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DualEvent{{nonce: {}, src: {}:{}, method: {}, value: {}, pending: {}:{}}}",
            self.nonce,
            self.source_chain,
            self.source_tx_hash,
            self.summary.method,
            self.summary.value,
            self.pending_tx.target_chain,
            self.pending_tx.tx_hash,
        )
    }
}

/// Lifecycle of a relay instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Created,
    Started,
    Stopped,
    Terminated,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Created => "created",
            RelayState::Started => "started",
            RelayState::Stopped => "stopped",
            RelayState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
