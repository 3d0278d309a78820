//! Node client abstraction.
//!
//! [`NodeClient`] is the seam between the listener and the chain: the
//! WebSocket implementation lives in [`crate::ws`], tests plug in mocks.

use alloy_primitives::Address;
use async_trait::async_trait;
use tokio::sync::mpsc;

use chainlisten_core::error::TransportError;
use chainlisten_core::types::{EventFilter, RawLog};

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Item pushed to a log subscription.
pub type SubscriptionItem = Result<RawLog, TransportError>;

/// A live `logs` subscription.
///
/// The stream ends (or yields an error) when the underlying connection
/// drops; the subscription is then dead and must be recreated. The buffer
/// behind it is bounded; see [`crate::subscriptions`] for what happens when
/// the consumer falls behind.
#[derive(Debug)]
pub struct LogSubscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<SubscriptionItem>,
}

impl LogSubscription {
    pub fn new(id: SubscriptionId, rx: mpsc::Receiver<SubscriptionItem>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Next log or transport error. `None` means the connection is gone.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`next`](Self::next); `None` when nothing is
    /// queued.
    pub fn try_next(&mut self) -> Option<SubscriptionItem> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Current head block number (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64, TransportError>;

    /// Logs matching `filter` (`eth_getLogs`), in node order.
    async fn get_logs(&self, filter: &EventFilter) -> Result<Vec<RawLog>, TransportError>;

    /// Open a push subscription for logs emitted by `address`.
    async fn subscribe_logs(&self, address: Address) -> Result<LogSubscription, TransportError>;

    /// Cancel a subscription. Best effort; the id may already be dead.
    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError>;
}
