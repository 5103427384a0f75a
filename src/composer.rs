//! Counterpart Transaction Composer
//!
//! Builds and signs the transaction that answers a relayed event on the other
//! chain: a `matchAmount` credit on the local chain for external deposits,
//! and a `release` on the external chain for the reverse direction.
//!
//! The signer nonce is read from the supplied snapshot immediately before
//! each composition and never cached, so consecutive compositions against
//! states reflecting earlier submissions never reuse a nonce.

use std::fmt;
use std::str::FromStr;

use alloy::consensus::{SignableTransaction, Signed, TxLegacy};
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use tracing::{debug, warn};

use crate::contracts::{encode_match, encode_release};
use crate::error::RelayError;
use crate::ports::StateSnapshot;

/// Statically configured signing key for one direction
#[derive(Clone)]
pub struct SigningCredential {
    signer: PrivateKeySigner,
}

impl SigningCredential {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

impl FromStr for SigningCredential {
    type Err = RelayError;

    /// Parse a hex private key, with or without 0x prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let signer: PrivateKeySigner = s
            .trim()
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid private key: {}", e)))?;
        Ok(Self::new(signer))
    }
}

/// Custom Debug that redacts the key
impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("address", &self.address())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Gas parameters of composed transactions
#[derive(Debug, Clone, Copy)]
pub struct GasParams {
    pub gas_limit: u64,
    pub gas_price: u128,
}

impl Default for GasParams {
    fn default() -> Self {
        Self {
            gas_limit: 210_000,
            gas_price: 1_000_000_000, // 1 gwei
        }
    }
}

/// Composes signed calls to one exchange contract on one chain
#[derive(Debug)]
pub struct TxComposer {
    credential: SigningCredential,
    chain: String,
    chain_id: u64,
    contract: Address,
    gas: GasParams,
}

impl TxComposer {
    pub fn new(
        credential: SigningCredential,
        chain: &str,
        chain_id: u64,
        contract: Address,
        gas: GasParams,
    ) -> Self {
        Self {
            credential,
            chain: chain.to_string(),
            chain_id,
            contract,
            gas,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn signer_address(&self) -> Address {
        self.credential.address()
    }

    /// Credit `value * match_ratio` on the local exchange contract
    pub async fn compose_match(
        &self,
        state: &dyn StateSnapshot,
        value: U256,
        match_ratio: u64,
    ) -> Result<Signed<TxLegacy>, RelayError> {
        let nonce = state.nonce(self.signer_address()).await?;
        let matched = value.saturating_mul(U256::from(match_ratio));
        let tx = self.sign(nonce, encode_match(matched))?;
        debug!(
            chain = %self.chain,
            nonce,
            matched_value = %matched,
            tx_hash = %tx.hash(),
            "Composed match transaction"
        );
        Ok(tx)
    }

    /// Release `value` to `receiver` from the external exchange contract
    ///
    /// A zero signer nonce usually means an uninitialised signer account.
    /// It is reported but does not stop the composition.
    pub async fn compose_release(
        &self,
        state: &dyn StateSnapshot,
        value: U256,
        receiver: Address,
    ) -> Result<Signed<TxLegacy>, RelayError> {
        let signer = self.signer_address();
        let nonce = state.nonce(signer).await?;
        if nonce == 0 {
            warn!(
                chain = %self.chain,
                signer = %signer,
                contract = %self.contract,
                "Signer nonce is zero, account may be uninitialised"
            );
        }
        let tx = self.sign(nonce, encode_release(receiver, value))?;
        debug!(
            chain = %self.chain,
            nonce,
            receiver = %receiver,
            value = %value,
            tx_hash = %tx.hash(),
            "Composed release transaction"
        );
        Ok(tx)
    }

    fn sign(&self, nonce: u64, input: Bytes) -> Result<Signed<TxLegacy>, RelayError> {
        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price: self.gas.gas_price,
            gas_limit: self.gas.gas_limit,
            to: TxKind::Call(self.contract),
            value: U256::ZERO,
            input,
        };
        let signature = self
            .credential
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        Ok(tx.into_signed(signature))
    }
}
