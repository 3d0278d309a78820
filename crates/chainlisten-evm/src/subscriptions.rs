//! Routing of `eth_subscription` notifications to live subscriptions.
//!
//! Subscriptions do not survive a reconnect: when the socket drops every
//! entry gets a `Closed` error and is removed, and the owner re-subscribes.
//!
//! Each subscription buffers at most [`SUBSCRIPTION_BUFFER`] notifications.
//! The connection task never waits on a slow consumer: when a buffer is full
//! the subscription is dropped, its consumer sees the stream end after the
//! buffered items, and resubscribes. The live subscriber then refetches the
//! missed range with `eth_getLogs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use chainlisten_core::error::TransportError;

use crate::client::{LogSubscription, SubscriptionId, SubscriptionItem};

/// Notifications held per subscription before it is dropped.
pub const SUBSCRIPTION_BUFFER: usize = 1_024;

type Entries = HashMap<SubscriptionId, mpsc::Sender<SubscriptionItem>>;

#[derive(Clone)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<Entries>>,
    capacity: usize,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIPTION_BUFFER)
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager whose subscriptions buffer `capacity` notifications each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscription and return its receiving end.
    pub fn register(&self, id: SubscriptionId) -> LogSubscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.entries().insert(id.clone(), tx);
        LogSubscription::new(id, rx)
    }

    /// Forward an item to its subscription. Returns `false` if the id is
    /// unknown, its receiver was dropped, or its buffer is full; the entry is
    /// removed in the last two cases.
    pub fn dispatch(&self, id: &SubscriptionId, item: SubscriptionItem) -> bool {
        let mut entries = self.entries();
        let Some(sender) = entries.get(id) else {
            return false;
        };
        match sender.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    subscription = %id,
                    capacity = self.capacity,
                    "subscription buffer full, dropping subscription"
                );
                entries.remove(id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                entries.remove(id);
                false
            }
        }
    }

    pub fn remove(&self, id: &SubscriptionId) {
        self.entries().remove(id);
    }

    /// Fail every subscription with `Closed` and forget them all.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.entries().drain().collect();
        for (_, sender) in drained {
            // a full buffer still ends the stream once the sender is gone
            let _ = sender.try_send(Err(TransportError::Closed));
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, B256};
    use chainlisten_core::types::RawLog;

    fn log() -> RawLog {
        RawLog {
            address: Address::ZERO,
            topics: vec![],
            data: Bytes::new(),
            block_number: 7,
            transaction_hash: B256::ZERO,
            log_index: 0,
            removed: false,
        }
    }

    #[tokio::test]
    async fn register_and_dispatch() {
        let mgr = SubscriptionManager::new();
        let id = SubscriptionId("0xdeadbeef".into());
        let mut sub = mgr.register(id.clone());

        assert!(mgr.dispatch(&id, Ok(log())));
        assert!(!mgr.dispatch(&SubscriptionId("0xother".into()), Ok(log())));

        let got = sub.next().await.unwrap().unwrap();
        assert_eq!(got.block_number, 7);
    }

    #[tokio::test]
    async fn close_all_fails_subscribers() {
        let mgr = SubscriptionManager::new();
        let mut a = mgr.register(SubscriptionId("0xa".into()));
        let mut b = mgr.register(SubscriptionId("0xb".into()));
        assert_eq!(mgr.len(), 2);

        mgr.close_all();
        assert!(mgr.is_empty());
        assert!(matches!(a.next().await, Some(Err(TransportError::Closed))));
        assert!(matches!(b.next().await, Some(Err(TransportError::Closed))));
        assert!(a.next().await.is_none());
    }

    #[tokio::test]
    async fn full_buffer_drops_subscription() {
        let mgr = SubscriptionManager::with_capacity(2);
        let id = SubscriptionId("0x1".into());
        let mut sub = mgr.register(id.clone());

        assert!(mgr.dispatch(&id, Ok(log())));
        assert!(mgr.dispatch(&id, Ok(log())));
        assert!(!mgr.dispatch(&id, Ok(log())));
        assert!(mgr.is_empty());

        assert!(matches!(sub.next().await, Some(Ok(_))));
        assert!(matches!(sub.next().await, Some(Ok(_))));
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let mgr = SubscriptionManager::new();
        let id = SubscriptionId("0x1".into());
        drop(mgr.register(id.clone()));
        assert!(!mgr.dispatch(&id, Ok(log())));
        assert!(mgr.is_empty());
    }
}
