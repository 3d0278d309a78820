//! In-memory idempotency store.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chainlisten_core::error::StoreError;
use chainlisten_core::store::IdempotencyStore;
use chainlisten_core::types::IdempotencyKey;

/// Seen-set plus checkpoint held in RAM. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    seen: Mutex<HashSet<IdempotencyKey>>,
    checkpoint: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys marked so far.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<IdempotencyKey>> {
        // the set is only ever inserted into, so a poisoned guard is still consistent
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn seen(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        Ok(self.keys().contains(key))
    }

    async fn mark_seen(&self, key: &IdempotencyKey) -> Result<(), StoreError> {
        self.keys().insert(*key);
        Ok(())
    }

    async fn claim(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        Ok(self.keys().insert(*key))
    }

    async fn checkpoint(&self) -> Result<u64, StoreError> {
        Ok(self.checkpoint.load(Ordering::Acquire))
    }

    async fn advance_checkpoint(&self, block: u64) -> Result<(), StoreError> {
        self.checkpoint.fetch_max(block, Ordering::AcqRel);
        Ok(())
    }
}
