//! Dev Trigger Generator
//!
//! Fabricates external blocks on a timer and feeds them into the same block
//! slot the Chain Head Listener writes to, so the pipeline runs without a
//! live external chain. Unlike the listener it uses blocking sends: it owns
//! the production rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::contracts::encode_deposit;
use crate::hash::keccak256;
use crate::types::{Block, HeadBlock, MonitoredContract, Transaction};

/// Synthesizes one block addressed to the given contract
pub type BlockFactory = Arc<dyn Fn(Address) -> Block + Send + Sync>;

/// Ordered sleep intervals between generated blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSchedule {
    pub intervals: Vec<Duration>,
    /// Restart from the first interval after a full pass
    pub repeat: bool,
}

impl TriggerSchedule {
    pub fn from_millis(intervals: &[u64], repeat: bool) -> Self {
        Self {
            intervals: intervals.iter().copied().map(Duration::from_millis).collect(),
            repeat,
        }
    }
}

/// Factory producing blocks with one payable `deposit(receiver)` call
///
/// Block numbers count up from 1 and each transaction hash is unique, so the
/// pool never sees a generated source transaction twice.
pub fn deposit_block_factory(value: U256, receiver: String) -> BlockFactory {
    let counter = AtomicU64::new(0);
    Arc::new(move |contract: Address| {
        let number = counter.fetch_add(1, Ordering::Relaxed) + 1;

        let mut seed = Vec::with_capacity(28);
        seed.extend_from_slice(b"dev-deposit");
        seed.extend_from_slice(&number.to_be_bytes());
        let tx_hash = B256::from(keccak256(&seed));

        seed.extend_from_slice(b"block");
        let block_hash = B256::from(keccak256(&seed));

        Block {
            number,
            hash: block_hash,
            transactions: vec![Transaction {
                hash: tx_hash,
                to: Some(contract),
                value,
                input: encode_deposit(&receiver),
            }],
        }
    })
}

pub struct DevTriggerGenerator {
    schedule: TriggerSchedule,
    contract: MonitoredContract,
    factory: BlockFactory,
}

impl DevTriggerGenerator {
    pub fn new(schedule: TriggerSchedule, contract: MonitoredContract, factory: BlockFactory) -> Self {
        Self {
            schedule,
            contract,
            factory,
        }
    }

    /// Emit blocks until the schedule is exhausted or `out` closes
    pub async fn run(self, out: mpsc::Sender<HeadBlock>) {
        if self.schedule.intervals.is_empty() {
            info!("Dev trigger schedule is empty, nothing to generate");
            return;
        }

        info!(
            intervals = self.schedule.intervals.len(),
            repeat = self.schedule.repeat,
            "Dev trigger generator started"
        );

        loop {
            for interval in &self.schedule.intervals {
                tokio::time::sleep(*interval).await;

                let block = (self.factory)(self.contract.address());
                info!(
                    block_number = block.number,
                    txs = block.transactions.len(),
                    "Generated external block to trigger a dual event"
                );
                if out.send(Some(Arc::new(block))).await.is_err() {
                    debug!("Block channel closed, dev trigger generator exiting");
                    return;
                }
            }

            if !self.schedule.repeat {
                break;
            }
        }

        info!("Dev trigger schedule completed");
    }
}
