//! JSON-RPC 2.0 wire types and log parsing.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainlisten_core::error::TransportError;
use chainlisten_core::types::RawLog;

/// JSON-RPC request ID (number, string or null).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the node's error object as a `TransportError`.
    pub fn into_result(self) -> Result<Value, TransportError> {
        match self.error {
            Some(err) => Err(TransportError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A log object as returned by `eth_getLogs` and `eth_subscription`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<String>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl TryFrom<WireLog> for RawLog {
    type Error = TransportError;

    /// Pending logs carry no block/tx/index and are rejected.
    fn try_from(w: WireLog) -> Result<Self, Self::Error> {
        let block_number = w
            .block_number
            .as_deref()
            .ok_or_else(|| TransportError::Malformed("log without blockNumber".into()))
            .and_then(parse_hex_u64)?;
        let log_index = w
            .log_index
            .as_deref()
            .ok_or_else(|| TransportError::Malformed("log without logIndex".into()))
            .and_then(parse_hex_u64)?;
        let transaction_hash = w
            .transaction_hash
            .ok_or_else(|| TransportError::Malformed("log without transactionHash".into()))?;

        Ok(RawLog {
            address: w.address,
            topics: w.topics,
            data: w.data,
            block_number,
            transaction_hash,
            log_index,
            removed: w.removed,
        })
    }
}

/// Parse one log object from a JSON value.
pub fn parse_log(value: Value) -> Result<RawLog, TransportError> {
    let wire: WireLog = serde_json::from_value(value)?;
    RawLog::try_from(wire)
}

/// Parse a hex quantity (`"0x1a"`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::Malformed(format!("bad hex quantity {s:?}: {e}")))
}
