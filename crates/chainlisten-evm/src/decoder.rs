//! ABI-driven log decoding.
//!
//! A [`SignatureRegistry`] is built once from a JSON ABI. Each
//! [`EventSignature`] resolves its parameter types up front so per-log work
//! is a topic comparison plus one ABI decode of `data`.
//!
//! Indexed parameters are read positionally from `topics[1..]`. Reference
//! types (string, bytes, arrays, tuples) are only present as their keccak
//! hash, so those come back as the raw 32-byte topic.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::B256;

use chainlisten_core::error::DecodeError;
use chainlisten_core::event::DecodedEvent;
use chainlisten_core::types::RawLog;
use chainlisten_core::value::NormalizedValue;

use crate::normalizer::normalize;

#[derive(Debug, Clone)]
struct ResolvedParam {
    name: String,
    ty: DynSolType,
    indexed: bool,
}

/// One ABI event with its selector and resolved parameter types.
#[derive(Debug, Clone)]
pub struct EventSignature {
    name: String,
    signature: String,
    id: B256,
    params: Vec<ResolvedParam>,
    data_types: Vec<DynSolType>,
}

impl EventSignature {
    pub fn from_event(event: &Event) -> Result<Self, DecodeError> {
        let params = event
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let ty = input.resolve().map_err(|e| DecodeError::UnsupportedType {
                    event: event.name.clone(),
                    param: input.name.clone(),
                    reason: e.to_string(),
                })?;
                let name = if input.name.is_empty() {
                    format!("arg{i}")
                } else {
                    input.name.clone()
                };
                Ok(ResolvedParam {
                    name,
                    ty,
                    indexed: input.indexed,
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;

        let data_types = params
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.ty.clone())
            .collect();

        Ok(Self {
            name: event.name.clone(),
            signature: event.signature(),
            id: event.selector(),
            params,
            data_types,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// keccak256 of the canonical signature (`topics[0]`).
    pub fn id(&self) -> B256 {
        self.id
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        log.topic0() == Some(&self.id)
    }

    pub fn decode(&self, log: &RawLog) -> Result<DecodedEvent, DecodeError> {
        if !self.matches(log) {
            return Err(DecodeError::SignatureMismatch {
                event: self.name.clone(),
            });
        }

        let body = DynSolType::Tuple(self.data_types.clone())
            .abi_decode_sequence(&log.data)
            .map_err(|e| DecodeError::AbiDecodeFailed {
                event: self.name.clone(),
                reason: e.to_string(),
            })?;
        let mut body = match body {
            DynSolValue::Tuple(values) => values.into_iter(),
            other => vec![other].into_iter(),
        };

        let mut topic_index = 1;
        let mut fields = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let value = if param.indexed {
                let topic = log.topics.get(topic_index).ok_or_else(|| DecodeError::MissingTopic {
                    event: self.name.clone(),
                    index: topic_index,
                })?;
                topic_index += 1;
                self.decode_topic(&param.ty, topic)?
            } else {
                body.next().map(normalize).ok_or_else(|| DecodeError::AbiDecodeFailed {
                    event: self.name.clone(),
                    reason: format!("missing data value for {}", param.name),
                })?
            };
            fields.push((param.name.clone(), value));
        }

        Ok(DecodedEvent {
            name: self.name.clone(),
            signature: self.id,
            address: log.address,
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            fields,
        })
    }

    fn decode_topic(&self, ty: &DynSolType, topic: &B256) -> Result<NormalizedValue, DecodeError> {
        match ty {
            DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_) => Ok(NormalizedValue::Bytes(topic.to_vec())),
            _ => ty
                .abi_decode(topic.as_slice())
                .map(normalize)
                .map_err(|e| DecodeError::AbiDecodeFailed {
                    event: self.name.clone(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// topic0 → event signature lookup.
#[derive(Debug, Clone, Default)]
pub struct SignatureRegistry {
    by_id: HashMap<B256, Arc<EventSignature>>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the ABI's events. With a non-empty `only`, just those names
    /// are registered and each must exist in the ABI. Anonymous events have
    /// no topic0 and are skipped.
    pub fn from_abi(abi: &JsonAbi, only: &[String]) -> Result<Self, DecodeError> {
        for name in only {
            if !abi.events.contains_key(name) {
                return Err(DecodeError::InvalidAbi(format!("event {name} not found in ABI")));
            }
        }

        let mut registry = Self::new();
        for event in abi.events() {
            if event.anonymous {
                continue;
            }
            if !only.is_empty() && !only.contains(&event.name) {
                continue;
            }
            registry.register(EventSignature::from_event(event)?);
        }
        Ok(registry)
    }

    pub fn from_json(json: &str, only: &[String]) -> Result<Self, DecodeError> {
        let abi: JsonAbi =
            serde_json::from_str(json).map_err(|e| DecodeError::InvalidAbi(e.to_string()))?;
        Self::from_abi(&abi, only)
    }

    pub fn from_file(path: impl AsRef<Path>, only: &[String]) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DecodeError::InvalidAbi(format!("{}: {e}", path.display())))?;
        Self::from_json(&json, only)
    }

    pub fn register(&mut self, signature: EventSignature) {
        tracing::debug!(event = %signature.name, id = %signature.id, "registered event signature");
        self.by_id.insert(signature.id, Arc::new(signature));
    }

    /// The signature whose id equals the log's topic0, if any.
    pub fn lookup(&self, log: &RawLog) -> Option<&EventSignature> {
        log.topic0().and_then(|t| self.by_id.get(t)).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Registered signatures, sorted by name.
    pub fn signatures(&self) -> Vec<&EventSignature> {
        let mut all: Vec<_> = self.by_id.values().map(Arc::as_ref).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};

    pub(crate) const LENDING_ABI: &str = r#"[
        {
            "type": "event",
            "name": "DepositLend",
            "anonymous": false,
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "token", "type": "address", "indexed": true},
                {"name": "amount", "type": "uint256", "indexed": false},
                {"name": "mintAmount", "type": "uint256", "indexed": false}
            ]
        },
        {
            "type": "event",
            "name": "Transfer",
            "anonymous": false,
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ]
        },
        {
            "type": "function",
            "name": "deposit",
            "inputs": [{"name": "amount", "type": "uint256"}],
            "outputs": [],
            "stateMutability": "nonpayable"
        }
    ]"#;

    pub(crate) fn word(n: u64) -> [u8; 32] {
        U256::from(n).to_be_bytes::<32>()
    }

    pub(crate) fn deposit_log(registry: &SignatureRegistry, tx: u8, index: u64) -> RawLog {
        let sig = registry
            .signatures()
            .into_iter()
            .find(|s| s.name() == "DepositLend")
            .unwrap()
            .id();
        let mut data = Vec::new();
        data.extend_from_slice(&word(1_000));
        data.extend_from_slice(&word(2_000));
        RawLog {
            address: Address::repeat_byte(0xaa),
            topics: vec![
                sig,
                Address::repeat_byte(0x01).into_word(),
                Address::repeat_byte(0x02).into_word(),
            ],
            data: Bytes::from(data),
            block_number: 42,
            transaction_hash: B256::repeat_byte(tx),
            log_index: index,
            removed: false,
        }
    }

    #[test]
    fn transfer_selector() {
        let registry = SignatureRegistry::from_json(LENDING_ABI, &["Transfer".into()]).unwrap();
        assert_eq!(registry.len(), 1);
        let sig = registry.signatures()[0];
        assert_eq!(sig.signature(), "Transfer(address,address,uint256)");
        assert_eq!(
            format!("{}", sig.id()),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn unknown_event_name_rejected() {
        let err = SignatureRegistry::from_json(LENDING_ABI, &["Withdraw".into()]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidAbi(_)));
    }

    #[test]
    fn decodes_indexed_and_data_fields() {
        let registry = SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap();
        assert_eq!(registry.len(), 2);

        let log = deposit_log(&registry, 7, 3);
        let sig = registry.lookup(&log).unwrap();
        assert!(sig.matches(&log));

        let event = sig.decode(&log).unwrap();
        assert_eq!(event.name, "DepositLend");
        assert_eq!(event.block_number, 42);
        assert_eq!(event.log_index, 3);
        let names: Vec<_> = event.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["from", "token", "amount", "mintAmount"]);
        assert_eq!(
            event.field("from").and_then(|v| v.as_address()),
            Some(Address::repeat_byte(0x01).to_checksum(None).as_str())
        );
        assert_eq!(event.field("amount").and_then(|v| v.as_u128()), Some(1_000));
        assert_eq!(event.field("mintAmount").and_then(|v| v.as_u128()), Some(2_000));
    }

    #[test]
    fn unmatched_topic_not_found() {
        let registry = SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap();
        let mut log = deposit_log(&registry, 1, 0);
        log.topics[0] = B256::repeat_byte(0xff);
        assert!(registry.lookup(&log).is_none());

        log.topics.clear();
        assert!(registry.lookup(&log).is_none());
    }

    #[test]
    fn truncated_data_fails() {
        let registry = SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap();
        let mut log = deposit_log(&registry, 1, 0);
        log.data = Bytes::from(vec![0u8; 40]);
        let err = registry.lookup(&log).unwrap().decode(&log).unwrap_err();
        assert!(matches!(err, DecodeError::AbiDecodeFailed { .. }));
    }

    #[test]
    fn missing_indexed_topic_fails() {
        let registry = SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap();
        let mut log = deposit_log(&registry, 1, 0);
        log.topics.truncate(2);
        let err = registry.lookup(&log).unwrap().decode(&log).unwrap_err();
        assert!(matches!(err, DecodeError::MissingTopic { index: 2, .. }));
    }

    #[test]
    fn indexed_string_yields_topic_hash() {
        let abi = r#"[{"type":"event","name":"Named","anonymous":false,
            "inputs":[{"name":"label","type":"string","indexed":true}]}]"#;
        let registry = SignatureRegistry::from_json(abi, &[]).unwrap();
        let sig = registry.signatures()[0];
        let log = RawLog {
            address: Address::ZERO,
            topics: vec![sig.id(), B256::repeat_byte(0x5a)],
            data: Bytes::new(),
            block_number: 1,
            transaction_hash: B256::ZERO,
            log_index: 0,
            removed: false,
        };
        let event = sig.decode(&log).unwrap();
        assert_eq!(
            event.field("label"),
            Some(&NormalizedValue::Bytes(vec![0x5a; 32]))
        );
    }
}
