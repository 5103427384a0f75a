//! Bridge contract ABI definitions and call data decoding
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the exchange
//! contract deployed on the external chain and the match contract on the
//! local chain.

#![allow(clippy::too_many_arguments)]

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::error::DecodeError;
use crate::types::{EventSummary, Transaction};

sol! {
    /// Exchange contract watched on the external chain
    contract EthExchange {
        /// Release funds held by the contract back to a receiver
        function release(address receiver, uint256 amount) external;

        /// Record a match for a previous deposit
        function updateOnMatch(uint256 matchedId, uint256 matchedValue) external;

        /// Deposit native value to be credited on the local chain
        function deposit(string receiver) external payable;

        function getInfoById(uint256 infoId) external view returns (
            address sender,
            string receiver,
            uint256 amount,
            uint256 matchedValue
        );

        function id() external view returns (uint256);

        event onDeposit(uint256 id, address sender, string receiver, uint256 amount);
        event onRelease(address receiver, uint256 amount);
        event onMatch(uint256 id, address sender, uint256 matchedValue);
    }
}

sol! {
    /// Match contract on the local chain credited for external deposits
    contract KardiaExchange {
        function matchAmount(uint256 matchedValue) external;
    }
}

/// Selector table of every function of the external exchange interface
const METHODS: [([u8; 4], &str); 5] = [
    (EthExchange::releaseCall::SELECTOR, "release"),
    (EthExchange::updateOnMatchCall::SELECTOR, "updateOnMatch"),
    (EthExchange::depositCall::SELECTOR, "deposit"),
    (EthExchange::getInfoByIdCall::SELECTOR, "getInfoById"),
    (EthExchange::idCall::SELECTOR, "id"),
];

pub const DEPOSIT_METHOD: &str = "deposit";

/// Stateless decoder for the exchange contract interface
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractDecoder;

impl ContractDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Map the 4-byte selector at the head of `input` to a method name
    pub fn method_name(&self, input: &[u8]) -> Result<&'static str, DecodeError> {
        if input.len() < 4 {
            return Err(DecodeError::TooShort { len: input.len() });
        }
        let selector = &input[..4];
        METHODS
            .iter()
            .find(|(known, _)| known.as_slice() == selector)
            .map(|(_, name)| *name)
            .ok_or_else(|| DecodeError::UnknownSelector {
                selector: hex::encode(selector),
            })
    }

    /// Decode the receiver string argument of a `deposit` call
    pub fn decode_deposit_arg(&self, input: &[u8]) -> Result<String, DecodeError> {
        let call = EthExchange::depositCall::abi_decode(input, true).map_err(|e| {
            DecodeError::InvalidArguments {
                method: DEPOSIT_METHOD,
                reason: e.to_string(),
            }
        })?;
        Ok(call.receiver)
    }

    /// Summarize a matched transaction: method from call data, value from the
    /// native amount it carries
    pub fn summarize(&self, tx: &Transaction) -> Result<EventSummary, DecodeError> {
        let method = self.method_name(&tx.input)?;
        Ok(EventSummary {
            method: method.to_string(),
            value: tx.value,
        })
    }
}

/// Call data for `deposit(receiver)` on the external exchange
pub fn encode_deposit(receiver: &str) -> Bytes {
    EthExchange::depositCall {
        receiver: receiver.to_string(),
    }
    .abi_encode()
    .into()
}

/// Call data for `release(receiver, amount)` on the external exchange
pub fn encode_release(receiver: Address, amount: U256) -> Bytes {
    EthExchange::releaseCall { receiver, amount }.abi_encode().into()
}

/// Call data for `matchAmount(matchedValue)` on the local exchange
pub fn encode_match(matched_value: U256) -> Bytes {
    KardiaExchange::matchAmountCall {
        matchedValue: matched_value,
    }
    .abi_encode()
    .into()
}
