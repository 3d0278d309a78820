//! Bounded worker pool draining the ingestion channel.
//!
//! All workers share one receiver behind an async mutex. A worker holds the
//! lock only while waiting for the next item, so each log goes to exactly
//! one worker and handling runs concurrently across workers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::ConfigError;
use crate::handler::LogHandler;
use crate::types::RawLog;

/// Receiver half of the ingestion channel, shared by all workers.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<RawLog>>>;

/// Create the bounded ingestion channel.
pub fn ingestion_channel(capacity: usize) -> (mpsc::Sender<RawLog>, SharedReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<u64>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers. Each runs until the channel is closed and
    /// drained.
    pub fn start(
        concurrency: usize,
        rx: SharedReceiver,
        handler: Arc<dyn LogHandler>,
    ) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::invalid("worker_num", "must be at least 1"));
        }

        let workers = (0..concurrency)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                tokio::spawn(worker_loop(worker_id, rx, handler))
            })
            .collect();

        tracing::info!(concurrency, "worker pool started");
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to exit. Returns the total number of logs taken
    /// off the channel.
    pub async fn join(self) -> u64 {
        let mut total = 0;
        for worker in self.workers {
            match worker.await {
                Ok(n) => total += n,
                Err(e) => tracing::error!(error = %e, "worker task aborted"),
            }
        }
        total
    }
}

async fn worker_loop(worker_id: usize, rx: SharedReceiver, handler: Arc<dyn LogHandler>) -> u64 {
    let mut processed = 0u64;
    loop {
        let next = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(log) = next else {
            break;
        };
        processed += 1;

        let block = log.block_number;
        let tx_hash = log.transaction_hash;
        let log_index = log.log_index;

        match AssertUnwindSafe(handler.handle_log(log)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                worker_id,
                block,
                tx = %tx_hash,
                log_index,
                error = %e,
                "log handler failed"
            ),
            Err(panic) => tracing::error!(
                worker_id,
                block,
                tx = %tx_hash,
                log_index,
                panic = panic_message(&*panic),
                "log handler panicked"
            ),
        }
    }
    tracing::debug!(worker_id, processed, "worker exiting, channel closed");
    processed
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
