//! Decoded events handed to business logic.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::types::IdempotencyKey;
use crate::value::NormalizedValue;

/// A log projected onto its ABI event: named fields in declaration order,
/// tagged with the identity of the originating log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Event name from the ABI, e.g. `"DepositLend"`.
    pub name: String,
    /// keccak256 of the canonical event signature (`topics[0]`).
    pub signature: B256,
    pub address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub fields: Vec<(String, NormalizedValue)>,
}

impl DecodedEvent {
    /// Look up a field by parameter name.
    pub fn field(&self, name: &str) -> Option<&NormalizedValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey::new(self.transaction_hash, self.log_index)
    }
}
