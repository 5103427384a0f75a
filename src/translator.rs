//! Event Translator
//!
//! Turns one matched external transaction into a `DualEvent` plus the signed
//! counterpart transaction it refers to. Adding the event to the pool and
//! submitting the transaction are left to the caller.

use std::sync::Arc;

use alloy::consensus::{Signed, TxLegacy};
use alloy::primitives::Address;
use tracing::{debug, info, warn};

use crate::composer::TxComposer;
use crate::contracts::{ContractDecoder, DEPOSIT_METHOD};
use crate::error::RelayError;
use crate::ports::ChainState;
use crate::types::{DualEvent, PendingTx, Transaction, EXTERNAL_CHAIN};

pub struct EventTranslator {
    decoder: ContractDecoder,
    local_state: Arc<dyn ChainState>,
    composer: Arc<TxComposer>,
    /// Local account whose nonce stamps each event
    dual_state_address: Address,
    match_ratio: u64,
}

impl EventTranslator {
    pub fn new(
        local_state: Arc<dyn ChainState>,
        composer: Arc<TxComposer>,
        dual_state_address: Address,
        match_ratio: u64,
    ) -> Self {
        Self {
            decoder: ContractDecoder::new(),
            local_state,
            composer,
            dual_state_address,
            match_ratio,
        }
    }

    /// Translate a transaction sent to the monitored contract
    pub async fn translate(
        &self,
        tx: &Transaction,
    ) -> Result<(DualEvent, Signed<TxLegacy>), RelayError> {
        let summary = self.decoder.summarize(tx)?;

        if summary.method == DEPOSIT_METHOD {
            match self.decoder.decode_deposit_arg(&tx.input) {
                Ok(receiver) => info!(
                    tx_hash = %tx.hash,
                    receiver = %receiver,
                    value = %summary.value,
                    "Detected deposit"
                ),
                // The summary only needs the selector, a bad argument is not fatal
                Err(e) => warn!(tx_hash = %tx.hash, error = %e, "Deposit receiver not decodable"),
            }
        }

        let state = self.local_state.state().await?;
        let nonce = state.nonce(self.dual_state_address).await?;

        let counterpart = self
            .composer
            .compose_match(state.as_ref(), summary.value, self.match_ratio)
            .await?;

        let pending_tx = PendingTx {
            tx_hash: *counterpart.hash(),
            target_chain: self.composer.chain().to_string(),
        };
        let event = DualEvent::new(nonce, true, EXTERNAL_CHAIN, tx.hash, summary, pending_tx);
        debug!(event = %event, event_hash = %event.hash(), "Translated transaction");

        Ok((event, counterpart))
    }
}
