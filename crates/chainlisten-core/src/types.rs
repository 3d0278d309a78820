//! Log, filter and key types shared by producers and consumers.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// A contract log as observed from the node. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    /// Set by the node when the log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// The event signature topic, if any.
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey::new(self.transaction_hash, self.log_index)
    }
}

/// Globally unique identity of a log: `(transaction hash, log index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl IdempotencyKey {
    pub fn new(transaction_hash: B256, log_index: u64) -> Self {
        Self {
            transaction_hash,
            log_index,
        }
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.transaction_hash, self.log_index)
    }
}

/// Upper bound of a log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTarget {
    Number(u64),
    Latest,
}

impl BlockTarget {
    /// JSON-RPC block tag (`"0x1a"` or `"latest"`).
    pub fn to_rpc_tag(&self) -> String {
        match self {
            Self::Number(n) => format!("{n:#x}"),
            Self::Latest => "latest".to_string(),
        }
    }
}

/// Address + block range filter for log queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub address: Address,
    pub from_block: u64,
    pub to_block: BlockTarget,
}

impl EventFilter {
    /// Filter for every log emitted by `address` from genesis to `latest`.
    pub fn for_address(address: Address) -> Self {
        Self {
            address,
            from_block: 0,
            to_block: BlockTarget::Latest,
        }
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = block;
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = BlockTarget::Number(block);
        self
    }

    /// Rejects concrete ranges where `from_block > to_block`.
    pub fn validate(&self) -> Result<(), ScanError> {
        match self.to_block {
            BlockTarget::Number(to) if self.from_block > to => Err(ScanError::InvalidRange {
                from: self.from_block,
                to,
            }),
            _ => Ok(()),
        }
    }

    /// `eth_getLogs` filter object.
    pub fn to_rpc_params(&self) -> serde_json::Value {
        serde_json::json!({
            "address": format!("{:#x}", self.address),
            "fromBlock": BlockTarget::Number(self.from_block).to_rpc_tag(),
            "toBlock": self.to_block.to_rpc_tag(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rejects_inverted_range() {
        let f = EventFilter::for_address(Address::ZERO).from_block(10).to_block(5);
        assert!(matches!(
            f.validate(),
            Err(ScanError::InvalidRange { from: 10, to: 5 })
        ));
        assert!(EventFilter::for_address(Address::ZERO)
            .from_block(10)
            .validate()
            .is_ok());
    }

    #[test]
    fn filter_rpc_params() {
        let f = EventFilter::for_address(Address::repeat_byte(0xab))
            .from_block(16)
            .to_block(255);
        let p = f.to_rpc_params();
        assert_eq!(p["fromBlock"], "0x10");
        assert_eq!(p["toBlock"], "0xff");
        assert_eq!(
            p["address"],
            "0xabababababababababababababababababababab"
        );
    }

    #[test]
    fn key_identity() {
        let a = IdempotencyKey::new(B256::repeat_byte(1), 3);
        let b = IdempotencyKey::new(B256::repeat_byte(1), 3);
        let c = IdempotencyKey::new(B256::repeat_byte(1), 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
