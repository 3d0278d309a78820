//! Error types for ChainListen.

use thiserror::Error;

/// Errors raised by a node transport (connection, RPC or wire format).
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket connect/send/receive failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The connection dropped while the request or subscription was live.
    #[error("connection closed")]
    Closed,

    /// Response could not be deserialized.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A field in a node response had an unexpected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Returns `true` if the failure is transient and the call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::Closed)
    }
}

/// Errors from a historical range scan. Fatal to startup.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid block range: from {from} > to {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("log query for blocks {from}..={to} failed: {source}")]
    Rpc {
        from: u64,
        to: u64,
        #[source]
        source: TransportError,
    },

    #[error("latest block lookup failed: {0}")]
    Latest(#[source] TransportError),

    #[error("ingestion channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors while decoding a raw log against an event signature.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("topic0 does not match event {event}")]
    SignatureMismatch { event: String },

    #[error("event {event}: missing topic {index}")]
    MissingTopic { event: String, index: usize },

    #[error("event {event}: unsupported parameter type for {param}: {reason}")]
    UnsupportedType {
        event: String,
        param: String,
        reason: String,
    },

    #[error("event {event}: ABI decode failed: {reason}")]
    AbiDecodeFailed { event: String, reason: String },

    #[error("invalid ABI: {0}")]
    InvalidAbi(String),
}

/// Errors from an idempotency/checkpoint store backend.
#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Errors returned by business handlers.
#[derive(Debug, Error)]
#[error("handler '{handler}' failed: {reason}")]
pub struct HandlerError {
    pub handler: String,
    pub reason: String,
}

impl HandlerError {
    pub fn new(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Umbrella error for the listener as a whole.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("live subscriber stopped: {0}")]
    SubscriberStopped(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Closed.is_retryable());
        assert!(TransportError::WebSocket("reset".into()).is_retryable());
        assert!(!TransportError::Rpc {
            code: -32000,
            message: "limit exceeded".into()
        }
        .is_retryable());
    }

    #[test]
    fn scan_error_wraps_into_listener_error() {
        let err: ListenerError = ScanError::InvalidRange { from: 9, to: 3 }.into();
        assert_eq!(err.to_string(), "invalid block range: from 9 > to 3");
    }
}
