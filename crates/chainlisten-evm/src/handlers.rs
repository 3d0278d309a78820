//! Built-in event handlers.

use async_trait::async_trait;

use chainlisten_core::error::HandlerError;
use chainlisten_core::event::DecodedEvent;
use chainlisten_core::handler::EventHandler;

/// Logs every decoded event at `info` with its fields inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl LoggingHandler {
    /// `name=value` pairs in declaration order.
    pub fn format_fields(event: &DecodedEvent) -> String {
        event
            .fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &DecodedEvent) -> Result<(), HandlerError> {
        tracing::info!(
            event = %event.name,
            block = event.block_number,
            tx = %event.transaction_hash,
            log_index = event.log_index,
            fields = %Self::format_fields(event),
            "event received"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}
