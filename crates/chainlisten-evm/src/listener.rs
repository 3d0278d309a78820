//! The listener pipeline: startup backfill plus the live stream.
//!
//! # Startup
//! 1. Read the resume point from the store.
//! 2. Start the worker pool on the ingestion channel.
//! 3. Spawn the live subscriber and wait until it is streaming.
//! 4. Read `latest` and scan `[start, latest]` into the same channel.
//!
//! The subscription is in place before `latest` is read, so every block
//! after the scan's upper bound is covered by the live stream. Blocks near
//! `latest` may arrive from both producers; the store drops the second copy.
//!
//! Both producers and the workers share one [`Progress`]. The checkpoint
//! follows the backfill until it completes and only then the live stream,
//! so a failed or interrupted scan is resumed where it stopped.
//!
//! Any failure before the scan completes is fatal. After that the listener
//! runs until the subscriber task ends, which only happens on shutdown.

use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use chainlisten_core::config::ListenerConfig;
use chainlisten_core::error::{ListenerError, ScanError};
use chainlisten_core::handler::EventHandler;
use chainlisten_core::policy::{BackoffPolicy, FixedBackoff};
use chainlisten_core::pool::{ingestion_channel, WorkerPool};
use chainlisten_core::progress::Progress;
use chainlisten_core::store::SharedStore;
use chainlisten_core::types::RawLog;

use crate::client::NodeClient;
use crate::decoder::SignatureRegistry;
use crate::dispatch::{DispatchMetrics, Dispatcher};
use crate::scanner::{HistoricalScanner, ScanSummary};
use crate::subscriber::{LiveSubscriber, SubscriptionState};

pub struct Listener<C> {
    config: ListenerConfig,
    client: Arc<C>,
    registry: Arc<SignatureRegistry>,
    store: SharedStore,
    handler: Arc<dyn EventHandler>,
    resubscribe_policy: Arc<dyn BackoffPolicy>,
}

impl<C: NodeClient + 'static> Listener<C> {
    pub fn new(
        config: ListenerConfig,
        client: Arc<C>,
        registry: Arc<SignatureRegistry>,
        store: SharedStore,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let resubscribe_policy = Arc::new(FixedBackoff::new(config.resubscribe_delay()));
        Self {
            config,
            client,
            registry,
            store,
            handler,
            resubscribe_policy,
        }
    }

    pub fn with_resubscribe_policy(mut self, policy: Arc<dyn BackoffPolicy>) -> Self {
        self.resubscribe_policy = policy;
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Run startup to completion and return a handle to the live pipeline.
    pub async fn start(self) -> Result<RunningListener, ListenerError> {
        self.config.validate()?;
        let address = self.config.contract_address()?;

        // read before the subscriber can move it
        let checkpoint = self.store.checkpoint().await?;
        let start = if self.config.resume_from_checkpoint {
            self.config.from_block.max(checkpoint)
        } else {
            self.config.from_block
        };

        let progress = Arc::new(Progress::new(Arc::clone(&self.store)));
        let dispatcher = Arc::new(
            Dispatcher::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.store),
                Arc::clone(&self.handler),
            )
            .with_progress(Arc::clone(&progress)),
        );
        let (tx, rx) = ingestion_channel(self.config.channel_capacity);
        let pool = WorkerPool::start(self.config.worker_num, rx, dispatcher.clone())?;

        let subscriber = LiveSubscriber::new(
            Arc::clone(&self.client),
            address,
            Arc::clone(&progress),
            Arc::clone(&self.resubscribe_policy),
        )
        .with_gap_chunk(self.config.scan_chunk_size);
        let mut state = subscriber.state();
        let subscriber = tokio::spawn(subscriber.run(tx.clone()));

        let startup = self
            .backfill(address, start, &progress, &mut state, &tx)
            .await;
        // the subscriber now holds the only producer handle
        drop(tx);
        let (scan, latest) = match startup {
            Ok(done) => done,
            Err(e) => {
                subscriber.abort();
                return Err(e);
            }
        };

        Ok(RunningListener {
            scan,
            scanned_to: latest,
            dispatcher,
            state,
            subscriber: Some(subscriber),
            pool,
        })
    }

    async fn backfill(
        &self,
        address: Address,
        start: u64,
        progress: &Arc<Progress>,
        state: &mut watch::Receiver<SubscriptionState>,
        tx: &mpsc::Sender<RawLog>,
    ) -> Result<(ScanSummary, u64), ListenerError> {
        tracing::info!(%address, "waiting for live subscription");
        if state
            .wait_for(|s| *s == SubscriptionState::Streaming)
            .await
            .is_err()
        {
            return Err(ListenerError::SubscriberStopped(
                "subscriber exited before streaming".into(),
            ));
        }

        let latest = self
            .client
            .block_number()
            .await
            .map_err(ScanError::Latest)?;

        if start > latest {
            tracing::info!(start, latest, "nothing to backfill");
            progress.backfill_complete().await?;
            return Ok((ScanSummary::default(), latest));
        }

        let scanner = HistoricalScanner::new(
            Arc::clone(&self.client),
            Arc::clone(progress),
            self.config.scan_chunk_size,
        );
        let summary = scanner.scan(address, start, latest, tx).await?;
        progress.backfill_complete().await?;
        tracing::info!(
            from = start,
            to = latest,
            chunks = summary.chunks,
            logs = summary.logs,
            skipped = summary.skipped,
            "historical scan complete"
        );
        Ok((summary, latest))
    }

    /// Start, then run until the live subscriber stops.
    pub async fn run(self) -> Result<(), ListenerError> {
        let mut running = self.start().await?;
        let err = running.stopped().await;
        running.shutdown().await;
        Err(err)
    }
}

/// A listener past startup.
pub struct RunningListener {
    scan: ScanSummary,
    scanned_to: u64,
    dispatcher: Arc<Dispatcher>,
    state: watch::Receiver<SubscriptionState>,
    subscriber: Option<JoinHandle<()>>,
    pool: WorkerPool,
}

impl RunningListener {
    pub fn scan_summary(&self) -> ScanSummary {
        self.scan
    }

    /// `latest` as read at startup; the upper bound of the backfill.
    pub fn scanned_to(&self) -> u64 {
        self.scanned_to
    }

    pub fn metrics(&self) -> DispatchMetrics {
        self.dispatcher.metrics()
    }

    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Resolves once the live subscriber task has ended and returns why.
    /// The subscriber does not end while the pool is alive, so this only
    /// resolves on a fault.
    pub async fn stopped(&mut self) -> ListenerError {
        let Some(handle) = self.subscriber.as_mut() else {
            return ListenerError::SubscriberStopped("already stopped".into());
        };
        let reason = match handle.await {
            Ok(()) => "ingestion channel closed".to_string(),
            Err(e) => e.to_string(),
        };
        self.subscriber = None;
        tracing::error!(reason = %reason, "live subscriber stopped");
        ListenerError::SubscriberStopped(reason)
    }

    /// Stop the live subscriber, let the workers drain what is queued, and
    /// return the final counters.
    pub async fn shutdown(mut self) -> DispatchMetrics {
        if let Some(handle) = self.subscriber.take() {
            handle.abort();
            let _ = handle.await;
        }
        let processed = self.pool.join().await;
        tracing::info!(processed, "listener stopped");
        self.dispatcher.metrics()
    }
}
