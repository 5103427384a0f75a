//! Hash computation for dual event identities
//!
//! The identity of a `DualEvent` is keccak256 over a packed encoding of its
//! fields. Variable-length strings are length-prefixed (u32, big-endian) so
//! that adjacent fields can never alias each other.

use alloy::primitives::B256;
use tiny_keccak::{Hasher, Keccak};

use crate::types::{EventSummary, PendingTx};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

fn push_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Compute the identity hash of a dual event
///
/// Layout:
/// ```text
/// nonce (8) | fromExternal (1) | len+sourceChain | sourceTxHash (32)
///   | len+method | value (32) | pendingTxHash (32) | len+targetChain
/// ```
pub fn dual_event_hash(
    nonce: u64,
    from_external_chain: bool,
    source_chain: &str,
    source_tx_hash: &B256,
    summary: &EventSummary,
    pending_tx: &PendingTx,
) -> B256 {
    let mut data = Vec::with_capacity(
        8 + 1 + 4 + source_chain.len() + 32 + 4 + summary.method.len() + 32 + 32 + 4
            + pending_tx.target_chain.len(),
    );

    data.extend_from_slice(&nonce.to_be_bytes());
    data.push(from_external_chain as u8);
    push_str(&mut data, source_chain);
    data.extend_from_slice(source_tx_hash.as_slice());
    push_str(&mut data, &summary.method);
    data.extend_from_slice(&summary.value.to_be_bytes::<32>());
    data.extend_from_slice(pending_tx.tx_hash.as_slice());
    push_str(&mut data, &pending_tx.target_chain);

    B256::from(keccak256(&data))
}
