//! Block Scanner
//!
//! Filters a block's transactions down to those addressed to the monitored
//! contract, preserving block order.

use tracing::info;

use crate::types::{Block, MonitoredContract, Transaction};

/// Transactions of `block` sent to `contract`, in block order.
///
/// A missing block is an expected artifact of the head notification stream:
/// it is logged and yields nothing.
pub fn scan<'a>(block: Option<&'a Block>, contract: &MonitoredContract) -> Vec<&'a Transaction> {
    let Some(block) = block else {
        info!("Scanning skipped, head notification carried no block");
        return Vec::new();
    };

    block
        .transactions
        .iter()
        .filter(|tx| contract.is_target_of(tx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, B256, U256};

    fn tx(id: u8, to: Option<Address>) -> Transaction {
        Transaction {
            hash: B256::repeat_byte(id),
            to,
            value: U256::from(id),
            input: Bytes::new(),
        }
    }

    #[test]
    fn test_scan_keeps_block_order() {
        let monitored = Address::repeat_byte(0xca);
        let other = Address::repeat_byte(0x0b);
        let block = Block {
            number: 1,
            hash: B256::ZERO,
            transactions: vec![tx(0xa, Some(monitored)), tx(0xb, Some(other)), tx(0xc, Some(monitored))],
        };

        let matched = scan(Some(&block), &MonitoredContract::new(monitored));
        let hashes: Vec<B256> = matched.iter().map(|tx| tx.hash).collect();
        assert_eq!(hashes, vec![B256::repeat_byte(0xa), B256::repeat_byte(0xc)]);
    }

    #[test]
    fn test_scan_nil_block() {
        let matched = scan(None, &MonitoredContract::new(Address::repeat_byte(0xca)));
        assert!(matched.is_empty());
    }

    #[test]
    fn test_scan_skips_contract_creation() {
        let block = Block {
            number: 2,
            hash: B256::ZERO,
            transactions: vec![tx(0x1, None)],
        };
        let matched = scan(Some(&block), &MonitoredContract::new(Address::ZERO));
        assert!(matched.is_empty());
    }
}
