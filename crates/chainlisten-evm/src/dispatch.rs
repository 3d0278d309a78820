//! From raw log to business handler.
//!
//! For every log the pool hands over:
//!
//! 1. topic0 lookup; logs of unregistered events are dropped silently
//! 2. atomic claim of `(tx hash, log index)`; already-claimed keys are
//!    dropped silently
//! 3. ABI decode; a failure is logged once and the log dropped
//! 4. the event handler
//!
//! A claimed log is never redelivered, so a handler failure is logged and
//! the event is not retried.
//!
//! With a [`Progress`] attached, every log that went through these steps is
//! reported done, which is what moves the checkpoint. A log that hit a store
//! error was never claimed; it stays pending and holds the checkpoint below
//! its block for the rest of the run.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use chainlisten_core::error::{ListenerError, StoreError};
use chainlisten_core::handler::{EventHandler, LogHandler};
use chainlisten_core::progress::Progress;
use chainlisten_core::store::SharedStore;
use chainlisten_core::types::RawLog;

use crate::decoder::SignatureRegistry;

/// What happened to one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Unmatched,
    Duplicate,
    DecodeFailed,
    HandlerFailed,
    Handled,
}

/// Cumulative dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchMetrics {
    pub handled: u64,
    pub duplicates: u64,
    pub unmatched: u64,
    pub decode_errors: u64,
    pub handler_errors: u64,
}

pub struct Dispatcher {
    registry: Arc<SignatureRegistry>,
    store: SharedStore,
    handler: Arc<dyn EventHandler>,
    progress: Option<Arc<Progress>>,
    metrics: Mutex<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SignatureRegistry>,
        store: SharedStore,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            registry,
            store,
            handler,
            progress: None,
            metrics: Mutex::new(DispatchMetrics::default()),
        }
    }

    /// Report finished logs to `progress`.
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn metrics(&self) -> DispatchMetrics {
        *self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, outcome: DispatchOutcome) -> DispatchOutcome {
        let mut m = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            DispatchOutcome::Unmatched => m.unmatched += 1,
            DispatchOutcome::Duplicate => m.duplicates += 1,
            DispatchOutcome::DecodeFailed => m.decode_errors += 1,
            DispatchOutcome::HandlerFailed => m.handler_errors += 1,
            DispatchOutcome::Handled => m.handled += 1,
        }
        outcome
    }

    pub async fn dispatch(&self, log: &RawLog) -> Result<DispatchOutcome, StoreError> {
        let Some(signature) = self.registry.lookup(log) else {
            return Ok(self.record(DispatchOutcome::Unmatched));
        };

        if !self.store.claim(&log.key()).await? {
            tracing::trace!(key = %log.key(), "duplicate log skipped");
            return Ok(self.record(DispatchOutcome::Duplicate));
        }

        let event = match signature.decode(log) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    block = log.block_number,
                    tx = %log.transaction_hash,
                    log_index = log.log_index,
                    "decode fail"
                );
                return Ok(self.record(DispatchOutcome::DecodeFailed));
            }
        };

        match self.handler.handle(&event).await {
            Ok(()) => Ok(self.record(DispatchOutcome::Handled)),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    handler = self.handler.name(),
                    event = %event.name,
                    tx = %event.transaction_hash,
                    log_index = event.log_index,
                    "event handler failed"
                );
                Ok(self.record(DispatchOutcome::HandlerFailed))
            }
        }
    }
}

#[async_trait]
impl LogHandler for Dispatcher {
    async fn handle_log(&self, log: RawLog) -> Result<(), ListenerError> {
        let Some(progress) = &self.progress else {
            self.dispatch(&log).await?;
            return Ok(());
        };

        let in_flight = progress.in_flight(log.block_number);
        match self.dispatch(&log).await {
            Ok(_) => {
                drop(in_flight);
                progress.flush().await?;
                Ok(())
            }
            Err(e) => {
                in_flight.hold();
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::{deposit_log, LENDING_ABI};
    use alloy_primitives::{Bytes, B256};
    use chainlisten_core::error::HandlerError;
    use chainlisten_core::event::DecodedEvent;
    use chainlisten_core::pool::{ingestion_channel, WorkerPool};
    use chainlisten_core::error::StoreError;
    use chainlisten_core::progress::Producer;
    use chainlisten_core::store::IdempotencyStore;
    use chainlisten_core::types::IdempotencyKey;
    use chainlisten_storage::MemoryStore;
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Default)]
    struct Counting {
        calls: AtomicU64,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _e: &DecodedEvent) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Formatted tracing output of the current test thread.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let subscriber = tracing_subscriber::fmt()
                .with_writer(self.clone())
                .with_max_level(tracing::Level::TRACE)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn setup() -> (Arc<SignatureRegistry>, Arc<Counting>, Dispatcher) {
        let registry = Arc::new(SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap());
        let handler = Arc::new(Counting::default());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Arc::new(MemoryStore::new()),
            handler.clone(),
        );
        (registry, handler, dispatcher)
    }

    #[tokio::test]
    async fn duplicate_delivery_handled_once() {
        let (registry, handler, dispatcher) = setup();
        let log = deposit_log(&registry, 1, 0);

        assert_eq!(dispatcher.dispatch(&log).await.unwrap(), DispatchOutcome::Handled);
        for _ in 0..4 {
            assert_eq!(
                dispatcher.dispatch(&log).await.unwrap(),
                DispatchOutcome::Duplicate
            );
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.metrics().duplicates, 4);
    }

    #[tokio::test]
    async fn unmatched_log_never_reaches_handler() {
        let (registry, handler, dispatcher) = setup();
        let mut log = deposit_log(&registry, 1, 0);
        log.topics[0] = B256::repeat_byte(0xee);

        assert_eq!(
            dispatcher.dispatch(&log).await.unwrap(),
            DispatchOutcome::Unmatched
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        let m = dispatcher.metrics();
        assert_eq!(m.unmatched, 1);
        assert_eq!(m.decode_errors, 0);
    }

    #[tokio::test]
    async fn poison_log_dropped_and_later_logs_flow() {
        let (registry, handler, dispatcher) = setup();
        let mut poison = deposit_log(&registry, 1, 0);
        poison.data = Bytes::from(vec![0x01]);

        assert_eq!(
            dispatcher.dispatch(&poison).await.unwrap(),
            DispatchOutcome::DecodeFailed
        );
        // redelivery of the same poison log is a duplicate, not a second failure
        assert_eq!(
            dispatcher.dispatch(&poison).await.unwrap(),
            DispatchOutcome::Duplicate
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.metrics().decode_errors, 1);

        let good = deposit_log(&registry, 2, 0);
        assert_eq!(dispatcher.dispatch(&good).await.unwrap(), DispatchOutcome::Handled);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_log_logs_nothing() {
        let (registry, _, dispatcher) = setup();
        let mut log = deposit_log(&registry, 1, 0);
        log.topics[0] = B256::repeat_byte(0xee);

        let output = Captured::default();
        let _guard = output.install();
        dispatcher.dispatch(&log).await.unwrap();
        dispatcher.dispatch(&log).await.unwrap();

        assert_eq!(output.text(), "");
    }

    #[tokio::test]
    async fn poison_log_logged_once_across_redelivery() {
        let (registry, _, dispatcher) = setup();
        let mut poison = deposit_log(&registry, 1, 0);
        poison.data = Bytes::from(vec![0x01]);

        let output = Captured::default();
        let _guard = output.install();
        dispatcher.dispatch(&poison).await.unwrap();
        dispatcher.dispatch(&poison).await.unwrap();

        let text = output.text();
        assert_eq!(text.lines().filter(|l| l.contains("decode fail")).count(), 1, "{text}");
        assert_eq!(text.lines().filter(|l| l.contains("WARN")).count(), 1, "{text}");
    }

    #[tokio::test]
    async fn handler_failure_is_not_retried() {
        let registry = Arc::new(SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap());
        let failing = |_: &DecodedEvent| -> Result<(), HandlerError> {
            Err(HandlerError::new("db", "connection refused"))
        };
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(failing),
        );
        let log = deposit_log(&registry, 3, 1);

        assert_eq!(
            dispatcher.dispatch(&log).await.unwrap(),
            DispatchOutcome::HandlerFailed
        );
        assert_eq!(
            dispatcher.dispatch(&log).await.unwrap(),
            DispatchOutcome::Duplicate
        );
    }

    /// Accepts nothing: every claim fails.
    struct BrokenStore;

    #[async_trait]
    impl IdempotencyStore for BrokenStore {
        async fn seen(&self, _k: &IdempotencyKey) -> Result<bool, StoreError> {
            Err(StoreError("down".into()))
        }
        async fn mark_seen(&self, _k: &IdempotencyKey) -> Result<(), StoreError> {
            Err(StoreError("down".into()))
        }
        async fn claim(&self, _k: &IdempotencyKey) -> Result<bool, StoreError> {
            Err(StoreError("down".into()))
        }
        async fn checkpoint(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn advance_checkpoint(&self, _block: u64) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn at_block(registry: &SignatureRegistry, block: u64) -> RawLog {
        let mut log = deposit_log(registry, block as u8, 0);
        log.block_number = block;
        log
    }

    #[tokio::test]
    async fn checkpoint_moves_only_after_dispatch() {
        let registry = Arc::new(SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap());
        let store = Arc::new(MemoryStore::new());
        let progress = Arc::new(Progress::new(store.clone()));
        let dispatcher = Dispatcher::new(registry.clone(), store.clone(), Arc::new(Counting::default()))
            .with_progress(progress.clone());

        progress.enqueue(5);
        progress.enqueue(7);
        progress.covered(Producer::Backfill, 10).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), 4);

        dispatcher.handle_log(at_block(&registry, 5)).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), 6);
        dispatcher.handle_log(at_block(&registry, 7)).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn store_failure_pins_checkpoint() {
        let registry = Arc::new(SignatureRegistry::from_json(LENDING_ABI, &[]).unwrap());
        let checkpoints = Arc::new(MemoryStore::new());
        let progress = Arc::new(Progress::new(checkpoints.clone()));
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(BrokenStore), Arc::new(Counting::default()))
            .with_progress(progress.clone());

        progress.enqueue(5);
        progress.covered(Producer::Backfill, 10).await.unwrap();
        assert!(dispatcher.handle_log(at_block(&registry, 5)).await.is_err());
        assert_eq!(progress.pending(), 1);
        assert_eq!(checkpoints.checkpoint().await.unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_with_duplicates_invokes_handler_once_per_key() {
        let (registry, handler, dispatcher) = setup();
        let dispatcher = Arc::new(dispatcher);
        let (tx, rx) = ingestion_channel(32);
        let pool = WorkerPool::start(4, rx, dispatcher.clone()).unwrap();

        for _ in 0..3 {
            for i in 0..100u64 {
                tx.send(deposit_log(&registry, 9, i)).await.unwrap();
            }
        }
        drop(tx);
        pool.join().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 100);
        let m = dispatcher.metrics();
        assert_eq!(m.handled, 100);
        assert_eq!(m.duplicates, 200);
    }
}
