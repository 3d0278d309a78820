//! Listener configuration, loaded from YAML.
//!
//! ```yaml
//! rpc_ws: wss://bsc-testnet.example/ws
//! contract: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! worker_num: 8
//! abi_path: abi.json
//! events: [DepositLend]
//! db:
//!   dsn: data/listener.db
//! log:
//!   level: info
//!   components:
//!     chainlisten_evm: debug
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// WebSocket JSON-RPC endpoint (`ws://` or `wss://`).
    pub rpc_ws: String,
    /// Contract address whose logs are ingested.
    pub contract: String,
    /// Number of pool workers.
    #[serde(default = "default_worker_num")]
    pub worker_num: usize,
    /// Capacity of the ingestion channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// First block of the historical scan.
    #[serde(default)]
    pub from_block: u64,
    /// Maximum blocks per `eth_getLogs` call during the scan.
    #[serde(default = "default_scan_chunk_size")]
    pub scan_chunk_size: u64,
    /// Delay between dial attempts.
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
    /// Delay between resubscription attempts.
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
    /// JSON ABI file describing the contract's events.
    #[serde(default = "default_abi_path")]
    pub abi_path: String,
    /// Events to handle, by name. Empty means every event in the ABI.
    #[serde(default)]
    pub events: Vec<String>,
    /// Start the scan at the stored checkpoint when it is ahead of
    /// `from_block`.
    #[serde(default = "default_true")]
    pub resume_from_checkpoint: bool,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Idempotency/checkpoint store location. No DSN means in-memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    /// SQLite file path or `sqlite:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: target → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `"info,chainlisten_evm=debug"`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

fn default_worker_num() -> usize {
    4
}
fn default_channel_capacity() -> usize {
    10_000
}
fn default_scan_chunk_size() -> u64 {
    2_000
}
fn default_connect_retry_ms() -> u64 {
    3_000
}
fn default_resubscribe_delay_ms() -> u64 {
    1_000
}
fn default_abi_path() -> String {
    "abi.json".into()
}
fn default_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}

impl ListenerConfig {
    /// Config with defaults for everything but the endpoint and contract.
    pub fn new(rpc_ws: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            rpc_ws: rpc_ws.into(),
            contract: contract.into(),
            worker_num: default_worker_num(),
            channel_capacity: default_channel_capacity(),
            from_block: 0,
            scan_chunk_size: default_scan_chunk_size(),
            connect_retry_ms: default_connect_retry_ms(),
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
            abi_path: default_abi_path(),
            events: Vec::new(),
            resume_from_checkpoint: true,
            db: DbConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.rpc_ws)
            .map_err(|e| ConfigError::invalid("rpc_ws", e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::invalid(
                "rpc_ws",
                format!("expected ws:// or wss://, got {}://", url.scheme()),
            ));
        }
        self.contract_address()?;
        if self.worker_num == 0 {
            return Err(ConfigError::invalid("worker_num", "must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid("channel_capacity", "must be at least 1"));
        }
        if self.scan_chunk_size == 0 {
            return Err(ConfigError::invalid("scan_chunk_size", "must be at least 1"));
        }
        Ok(())
    }

    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        self.contract
            .parse()
            .map_err(|e| ConfigError::invalid("contract", format!("{e}")))
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}
