//! Resume-point tracking.
//!
//! The checkpoint written to the store is the highest block whose logs have
//! all been dispatched. Producers register each log with [`Progress::enqueue`]
//! before sending it and report how far their coverage reaches with
//! [`Progress::covered`]; workers report each log once dispatch is over.
//!
//! Coverage reported by the live stream only counts once the backfill has
//! finished, so a live log never moves the resume point past history that
//! was not scanned yet.
//!
//! Resume is inclusive: a restarted listener rescans the checkpoint block
//! itself, and the idempotency store absorbs whatever was already handled.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::store::SharedStore;

/// Which producer reports coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    Backfill,
    Live,
}

#[derive(Debug, Default)]
struct State {
    /// Block -> logs sent to the channel but not yet dispatched.
    pending: BTreeMap<u64, usize>,
    backfill: Option<u64>,
    live: Option<u64>,
    backfill_done: bool,
    written: Option<u64>,
}

impl State {
    fn frontier(&self) -> Option<u64> {
        if self.backfill_done {
            self.backfill.max(self.live)
        } else {
            self.backfill
        }
    }

    fn watermark(&self) -> Option<u64> {
        let frontier = self.frontier()?;
        match self.pending.keys().next() {
            Some(&lowest) => lowest.checked_sub(1).map(|b| b.min(frontier)),
            None => Some(frontier),
        }
    }

    fn release(&mut self, block: u64) {
        if let Some(count) = self.pending.get_mut(&block) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(&block);
            }
        }
    }
}

pub struct Progress {
    store: SharedStore,
    state: Mutex<State>,
}

impl Progress {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A log at `block` is about to be sent to the ingestion channel.
    pub fn enqueue(&self, block: u64) {
        *self.state().pending.entry(block).or_default() += 1;
    }

    /// Forget a log registered with [`enqueue`](Self::enqueue) without
    /// writing anything. Used when the send itself failed.
    pub fn release(&self, block: u64) {
        self.state().release(block);
    }

    /// Guard for a log being dispatched. Dropping it releases the log, so a
    /// panicking handler does not pin the resume point.
    pub fn in_flight(&self, block: u64) -> InFlight<'_> {
        InFlight {
            progress: self,
            block,
            armed: true,
        }
    }

    /// Dispatch of a log at `block` is over; write the new resume point.
    pub async fn complete(&self, block: u64) -> Result<(), StoreError> {
        self.release(block);
        self.flush().await
    }

    /// Every log of `producer` up to and including `block` has been enqueued.
    pub async fn covered(&self, producer: Producer, block: u64) -> Result<(), StoreError> {
        {
            let mut state = self.state();
            let slot = match producer {
                Producer::Backfill => &mut state.backfill,
                Producer::Live => &mut state.live,
            };
            *slot = (*slot).max(Some(block));
        }
        self.flush().await
    }

    /// The backfill is over; live coverage now counts.
    pub async fn backfill_complete(&self) -> Result<(), StoreError> {
        self.state().backfill_done = true;
        self.flush().await
    }

    /// Highest block that is safe to resume from, if any.
    pub fn watermark(&self) -> Option<u64> {
        self.state().watermark()
    }

    /// Logs enqueued and not yet dispatched.
    pub fn pending(&self) -> usize {
        self.state().pending.values().sum()
    }

    /// Write the watermark to the store if it moved.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let target = {
            let state = self.state();
            match state.watermark() {
                Some(w) if state.written.map_or(true, |done| w > done) => w,
                _ => return Ok(()),
            }
        };
        self.store.advance_checkpoint(target).await?;
        let mut state = self.state();
        state.written = state.written.max(Some(target));
        Ok(())
    }
}

/// See [`Progress::in_flight`].
pub struct InFlight<'a> {
    progress: &'a Progress,
    block: u64,
    armed: bool,
}

impl InFlight<'_> {
    /// Keep the log pending for the rest of the run. The resume point then
    /// stays below its block.
    pub fn hold(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.progress.release(self.block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IdempotencyStore;
    use crate::types::IdempotencyKey;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CheckpointOnly(AtomicU64);

    #[async_trait]
    impl IdempotencyStore for CheckpointOnly {
        async fn seen(&self, _k: &IdempotencyKey) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn mark_seen(&self, _k: &IdempotencyKey) -> Result<(), StoreError> {
            Ok(())
        }
        async fn claim(&self, _k: &IdempotencyKey) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn checkpoint(&self) -> Result<u64, StoreError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
        async fn advance_checkpoint(&self, block: u64) -> Result<(), StoreError> {
            self.0.fetch_max(block, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (Arc<CheckpointOnly>, Progress) {
        let store = Arc::new(CheckpointOnly::default());
        let progress = Progress::new(store.clone());
        (store, progress)
    }

    #[tokio::test]
    async fn queued_logs_hold_back_the_checkpoint() {
        let (store, progress) = setup();
        progress.enqueue(10);
        progress.enqueue(55);
        progress.covered(Producer::Backfill, 100).await.unwrap();
        assert_eq!(store.0.load(Ordering::SeqCst), 9);

        progress.complete(55).await.unwrap();
        assert_eq!(store.0.load(Ordering::SeqCst), 9);
        progress.complete(10).await.unwrap();
        assert_eq!(store.0.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn live_coverage_waits_for_backfill() {
        let (store, progress) = setup();
        progress.covered(Producer::Backfill, 39).await.unwrap();
        progress.enqueue(101);
        progress.complete(101).await.unwrap();
        progress.covered(Producer::Live, 101).await.unwrap();
        assert_eq!(store.0.load(Ordering::SeqCst), 39);

        progress.covered(Producer::Backfill, 100).await.unwrap();
        assert_eq!(store.0.load(Ordering::SeqCst), 100);
        progress.backfill_complete().await.unwrap();
        assert_eq!(store.0.load(Ordering::SeqCst), 101);
    }

    #[tokio::test]
    async fn held_log_pins_the_checkpoint() {
        let (store, progress) = setup();
        progress.enqueue(5);
        progress.enqueue(8);
        progress.backfill_complete().await.unwrap();
        progress.covered(Producer::Live, 8).await.unwrap();

        drop(progress.in_flight(8));
        progress.in_flight(5).hold();
        progress.flush().await.unwrap();
        assert_eq!(progress.pending(), 1);
        assert_eq!(store.0.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn nothing_covered_means_no_watermark() {
        let (_, progress) = setup();
        progress.enqueue(0);
        assert_eq!(progress.watermark(), None);
    }
}
