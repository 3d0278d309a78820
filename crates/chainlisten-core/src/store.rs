//! Idempotency and checkpoint bookkeeping.
//!
//! The scan and the live subscription overlap, so the same log can reach the
//! worker pool more than once. The store remembers which
//! `(transaction hash, log index)` pairs were already handed to business
//! logic, and the resume point: the highest block whose logs have all been
//! dispatched (see `progress`).
//!
//! Implementations: `MemoryStore` and `SqliteStore` in `chainlisten-storage`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::IdempotencyKey;

/// Shared handle injected into the scanner, subscriber and dispatcher.
pub type SharedStore = Arc<dyn IdempotencyStore>;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether `key` has been marked.
    async fn seen(&self, key: &IdempotencyKey) -> Result<bool, StoreError>;

    /// Mark `key`. Marks are never removed.
    async fn mark_seen(&self, key: &IdempotencyKey) -> Result<(), StoreError>;

    /// Atomic check-then-set. Returns `true` only for the caller that marked
    /// `key` first; concurrent callers with the same key get `false`.
    async fn claim(&self, key: &IdempotencyKey) -> Result<bool, StoreError>;

    /// Resume point recorded so far (0 when nothing was recorded).
    async fn checkpoint(&self) -> Result<u64, StoreError>;

    /// Raise the checkpoint to `block`. Lower or equal values are ignored.
    async fn advance_checkpoint(&self, block: u64) -> Result<(), StoreError>;
}
