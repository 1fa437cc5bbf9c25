//! # Ledger
//!
//! The ledger is an external collaborator. The executor only needs three
//! calls from it: the account's next sequence number, signing a request, and
//! submitting the signed operation until it is included.
//!
//! Each operation calls a storage method on a deployed contract with two
//! ABI-encoded words: the reading value (`int256`) and its timestamp in unix
//! seconds (`uint256`).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensor::Reading;

/// First four bytes of the calldata, selecting the contract method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodSelector([u8; 4]);

impl MethodSelector {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl FromStr for MethodSelector {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| LedgerError::InvalidSelector {
            selector: s.to_string(),
            message: e.to_string(),
        })?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| LedgerError::InvalidSelector {
                selector: s.to_string(),
                message: "expected 4 bytes".to_string(),
            })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MethodSelector {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MethodSelector> for String {
    fn from(value: MethodSelector) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MethodSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Unsigned transaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: String,
    pub to: String,
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: u64,
    pub chain_id: Option<u64>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOperation {
    pub sequence: u64,
    /// 0x-prefixed raw transaction.
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
}

/// Everything about an operation that stays fixed across a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTemplate {
    pub from: String,
    pub contract: String,
    pub selector: MethodSelector,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub chain_id: Option<u64>,
}

impl OperationTemplate {
    pub fn build(&self, sequence: u64, reading: &Reading) -> TxRequest {
        TxRequest {
            from: self.from.clone(),
            to: self.contract.clone(),
            nonce: sequence,
            gas: self.gas_limit,
            gas_price: self.gas_price,
            chain_id: self.chain_id,
            data: encode_store_call(self.selector, reading),
        }
    }
}

/// `selector ‖ int256(value) ‖ uint256(timestamp)`
pub fn encode_store_call(selector: MethodSelector, reading: &Reading) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&selector.bytes());
    data.extend_from_slice(&int256_word(reading.value));
    data.extend_from_slice(&uint256_word(reading.taken_at.timestamp().max(0) as u64));
    data
}

fn int256_word(value: i64) -> [u8; 32] {
    let mut word = if value < 0 { [0xff; 32] } else { [0; 32] };
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn uint256_word(value: u64) -> [u8; 32] {
    let mut word = [0; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

#[mockall::automock]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Next sequence number (nonce) of `account`.
    async fn sequence_number(&self, account: &str) -> LedgerResult<u64>;

    async fn sign(&self, request: &TxRequest) -> LedgerResult<SignedOperation>;

    /// Submits and waits until the operation is included.
    async fn submit(&self, operation: &SignedOperation) -> LedgerResult<Receipt>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Failed to fetch sequence number: {message}")]
    SequenceFetch { message: String },
    #[error("Failed to sign operation {sequence}: {message}")]
    Signing { sequence: u64, message: String },
    #[error("Failed to submit operation {sequence}: {message}")]
    Submission { sequence: u64, message: String },
    #[error("Invalid method selector {selector}: {message}")]
    InvalidSelector { selector: String, message: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
