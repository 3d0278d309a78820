//! Fluent builder API for creating listeners.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainlisten_evm::ListenerBuilder;
//!
//! # async fn demo() -> Result<(), chainlisten_core::ListenerError> {
//! let listener = ListenerBuilder::new()
//!     .rpc_ws("wss://eth.example.org/ws")
//!     .contract("0x5FbDB2315678afecb367f032d93F642f64180aa3")
//!     .abi_path("abi.json")
//!     .events(["DepositLend"])
//!     .workers(8)
//!     .connect()
//!     .await?;
//! listener.run().await
//! # }
//! ```

use std::sync::Arc;

use chainlisten_core::config::ListenerConfig;
use chainlisten_core::error::ListenerError;
use chainlisten_core::handler::{EventHandler, HandlerRegistry};
use chainlisten_core::policy::{BackoffPolicy, FixedBackoff};
use chainlisten_core::store::SharedStore;
use chainlisten_storage::MemoryStore;

use crate::client::NodeClient;
use crate::decoder::SignatureRegistry;
use crate::handlers::LoggingHandler;
use crate::listener::Listener;
use crate::ws::WsNodeClient;

/// Fluent builder for [`Listener`].
///
/// Defaults: in-memory store, [`LoggingHandler`], fixed retry delays from
/// the config.
///
/// Handlers registered with [`on_event`](Self::on_event) or
/// [`on_any`](Self::on_any) are routed through a [`HandlerRegistry`]; a
/// handler set with [`handler`](Self::handler) then joins it as a
/// catch-all.
pub struct ListenerBuilder {
    config: ListenerConfig,
    abi_json: Option<String>,
    store: Option<SharedStore>,
    handler: Option<Arc<dyn EventHandler>>,
    routes: HandlerRegistry,
    connect_policy: Option<Arc<dyn BackoffPolicy>>,
    resubscribe_policy: Option<Arc<dyn BackoffPolicy>>,
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerBuilder {
    pub fn new() -> Self {
        Self::from_config(ListenerConfig::new("", ""))
    }

    /// Start from a loaded config file.
    pub fn from_config(config: ListenerConfig) -> Self {
        Self {
            config,
            abi_json: None,
            store: None,
            handler: None,
            routes: HandlerRegistry::new(),
            connect_policy: None,
            resubscribe_policy: None,
        }
    }

    /// Set the WebSocket endpoint.
    pub fn rpc_ws(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_ws = url.into();
        self
    }

    /// Set the contract whose logs are ingested.
    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.config.contract = address.into();
        self
    }

    /// Set the number of pool workers.
    pub fn workers(mut self, n: usize) -> Self {
        self.config.worker_num = n;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the first block of the historical scan.
    pub fn from_block(mut self, block: u64) -> Self {
        self.config.from_block = block;
        self
    }

    /// Set the number of blocks per `eth_getLogs` call.
    pub fn scan_chunk_size(mut self, size: u64) -> Self {
        self.config.scan_chunk_size = size;
        self
    }

    pub fn resume_from_checkpoint(mut self, resume: bool) -> Self {
        self.config.resume_from_checkpoint = resume;
        self
    }

    /// Load event signatures from this ABI file.
    pub fn abi_path(mut self, path: impl Into<String>) -> Self {
        self.config.abi_path = path.into();
        self
    }

    /// Use an inline JSON ABI instead of `abi_path`.
    pub fn abi_json(mut self, json: impl Into<String>) -> Self {
        self.abi_json = Some(json.into());
        self
    }

    /// Restrict handling to these event names.
    pub fn events<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.events = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Run `handler` for every decoded `event` (e.g. `"DepositLend"`).
    pub fn on_event(mut self, event: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.on_event(event, handler);
        self
    }

    /// Run `handler` for every decoded event.
    pub fn on_any(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.on_any(handler);
        self
    }

    /// Delay policy between dial attempts.
    pub fn connect_policy(mut self, policy: Arc<dyn BackoffPolicy>) -> Self {
        self.connect_policy = Some(policy);
        self
    }

    /// Delay policy between resubscription attempts.
    pub fn resubscribe_policy(mut self, policy: Arc<dyn BackoffPolicy>) -> Self {
        self.resubscribe_policy = Some(policy);
        self
    }

    /// Build the `ListenerConfig`.
    pub fn build_config(self) -> ListenerConfig {
        self.config
    }

    fn registry(&self) -> Result<SignatureRegistry, ListenerError> {
        let registry = match &self.abi_json {
            Some(json) => SignatureRegistry::from_json(json, &self.config.events)?,
            None => SignatureRegistry::from_file(&self.config.abi_path, &self.config.events)?,
        };
        if registry.is_empty() {
            tracing::warn!("ABI declares no events, every log will be dropped");
        }
        Ok(registry)
    }

    /// Build a listener on an existing node client.
    pub fn build<C>(self, client: Arc<C>) -> Result<Listener<C>, ListenerError>
    where
        C: NodeClient + 'static,
    {
        self.config.validate()?;
        let registry = self.registry()?;
        Ok(self.assemble(client, registry))
    }

    /// Validate, dial the configured endpoint (retrying until it answers)
    /// and build the listener on it.
    pub async fn connect(self) -> Result<Listener<WsNodeClient>, ListenerError> {
        self.config.validate()?;
        // fail on a bad ABI before blocking on the dial
        let registry = self.registry()?;

        let policy = self
            .connect_policy
            .clone()
            .unwrap_or_else(|| {
                Arc::new(FixedBackoff::new(self.config.connect_retry())) as Arc<dyn BackoffPolicy>
            });
        let client = WsNodeClient::connect(self.config.rpc_ws.clone(), policy).await;
        tracing::info!(url = %client.url(), "connected to node");
        Ok(self.assemble(Arc::new(client), registry))
    }

    fn assemble<C>(self, client: Arc<C>, registry: SignatureRegistry) -> Listener<C>
    where
        C: NodeClient + 'static,
    {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()) as SharedStore);
        let mut routes = self.routes;
        let handler: Arc<dyn EventHandler> = if routes.is_empty() {
            self.handler
                .unwrap_or_else(|| Arc::new(LoggingHandler) as Arc<dyn EventHandler>)
        } else {
            if let Some(handler) = self.handler {
                routes.on_any(handler);
            }
            Arc::new(routes)
        };

        let mut listener = Listener::new(self.config, client, Arc::new(registry), store, handler);
        if let Some(policy) = self.resubscribe_policy {
            listener = listener.with_resubscribe_policy(policy);
        }
        listener
    }
}
