//! Handler traits + registry.
//!
//! Two seams: [`LogHandler`] is what the worker pool calls for every raw log
//! it drains, [`EventHandler`] is business logic called once per decoded,
//! first-seen event.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HandlerError, ListenerError};
use crate::event::DecodedEvent;
use crate::types::RawLog;

/// Called by a pool worker for each log taken off the ingestion channel.
#[async_trait]
pub trait LogHandler: Send + Sync {
    async fn handle_log(&self, log: RawLog) -> Result<(), ListenerError>;
}

/// User-provided business logic for decoded events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DecodedEvent) -> Result<(), HandlerError>;

    /// Name used in logs when the handler fails.
    fn name(&self) -> &str {
        "handler"
    }
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&DecodedEvent) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: &DecodedEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Routes decoded events to handlers registered per event name, plus
/// catch-all handlers that see every event.
#[derive(Default)]
pub struct HandlerRegistry {
    by_event: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    any: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event name (e.g. `"DepositLend"`).
    pub fn on_event(&mut self, event: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.by_event.entry(event.into()).or_default().push(handler);
    }

    /// Register a handler for every event.
    pub fn on_any(&mut self, handler: Arc<dyn EventHandler>) {
        self.any.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.any.is_empty() && self.by_event.values().all(Vec::is_empty)
    }
}

#[async_trait]
impl EventHandler for HandlerRegistry {
    /// Runs every matching handler in registration order; stops at the first
    /// failure.
    async fn handle(&self, event: &DecodedEvent) -> Result<(), HandlerError> {
        if let Some(handlers) = self.by_event.get(&event.name) {
            for handler in handlers {
                handler.handle(event).await?;
            }
        }
        for handler in &self.any {
            handler.handle(event).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "registry"
    }
}
