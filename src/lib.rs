//! Kardia dual node - cross-chain event relay
//!
//! Watches the external chain's head, relays deposits addressed to the
//! monitored exchange contract as `DualEvent`s and answers them with signed
//! transactions on the counterpart chain.
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod composer;
pub mod config;
pub mod contracts;
pub mod dev;
pub mod error;
pub mod hash;
pub mod listener;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod ports;
pub mod relay;
pub mod rpc;
pub mod scanner;
pub mod translator;
pub mod types;

pub use error::{DecodeError, RelayError};
pub use relay::{ChainEndpoint, DualRelay, RelayConfig};
pub use types::{DualEvent, EventSummary, PendingTx, RelayState};
