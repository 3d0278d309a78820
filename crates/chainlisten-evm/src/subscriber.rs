//! Live log subscriber with automatic resubscription.
//!
//! Two states, published on a `watch` channel:
//!
//! - `Disconnected`: open a subscription; on failure wait the policy delay
//!   and try again.
//! - `Streaming`: forward each log to the ingestion channel; on a
//!   subscription or transport error tear down, wait the policy delay and go
//!   back to `Disconnected`.
//!
//! A new subscription only carries logs from the moment it was opened. After
//! a resubscribe the subscriber reads the head and fetches
//! `[last forwarded block, head]` with `eth_getLogs`, so logs emitted while
//! the stream was down still reach the pool. Overlap with the stream is
//! dropped by the idempotency store.
//!
//! The loop has no terminal state. It only returns once the ingestion
//! channel has no receiver left.

use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::{mpsc, watch};
use tokio::time;

use chainlisten_core::error::{ScanError, TransportError};
use chainlisten_core::policy::BackoffPolicy;
use chainlisten_core::progress::{Producer, Progress};
use chainlisten_core::types::RawLog;

use crate::client::{LogSubscription, NodeClient};
use crate::scanner::HistoricalScanner;

const DEFAULT_GAP_CHUNK: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Streaming,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// Why a streaming phase ended.
enum Stop {
    ChannelClosed,
    Dropped(String),
}

pub struct LiveSubscriber<C> {
    client: Arc<C>,
    address: Address,
    progress: Arc<Progress>,
    policy: Arc<dyn BackoffPolicy>,
    gap_chunk: u64,
    state: watch::Sender<SubscriptionState>,
}

impl<C: NodeClient> LiveSubscriber<C> {
    pub fn new(
        client: Arc<C>,
        address: Address,
        progress: Arc<Progress>,
        policy: Arc<dyn BackoffPolicy>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Disconnected);
        Self {
            client,
            address,
            progress,
            policy,
            gap_chunk: DEFAULT_GAP_CHUNK,
            state,
        }
    }

    /// Block span of each `eth_getLogs` call when filling an outage gap.
    pub fn with_gap_chunk(mut self, blocks: u64) -> Self {
        self.gap_chunk = blocks.max(1);
        self
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    pub async fn run(self, out: mpsc::Sender<RawLog>) {
        let mut attempt = 0u32;
        // where a gap fill starts after the next outage
        let mut cursor: Option<u64> = None;
        let mut resumed = false;
        loop {
            self.state.send_replace(SubscriptionState::Disconnected);

            let mut sub = match self.client.subscribe_logs(self.address).await {
                Ok(sub) => sub,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.policy.next_delay(attempt);
                    tracing::warn!(error = %e, attempt, "log subscription failed, retrying in {delay:?}");
                    time::sleep(delay).await;
                    continue;
                }
            };

            attempt = 0;
            self.state.send_replace(SubscriptionState::Streaming);
            tracing::info!(subscription = %sub.id(), address = %self.address, "log subscription established");

            let stop = match self.catch_up(resumed, &mut cursor, &out).await {
                Ok(()) => self.stream(&mut sub, &mut cursor, &out).await,
                Err(stop) => stop,
            };
            resumed = true;

            self.state.send_replace(SubscriptionState::Disconnected);
            if let Err(e) = self.client.unsubscribe(sub.id()).await {
                tracing::debug!(error = %e, subscription = %sub.id(), "unsubscribe failed");
            }
            let reason = match stop {
                Stop::ChannelClosed => {
                    tracing::info!("ingestion channel closed, live subscriber stopping");
                    return;
                }
                Stop::Dropped(reason) => reason,
            };

            attempt = 1;
            let delay = self.policy.next_delay(attempt);
            tracing::warn!(error = %reason, "log subscription dropped, resubscribing in {delay:?}");
            time::sleep(delay).await;
        }
    }

    /// On the first subscription, remember the head as the gap-fill anchor.
    /// After a resubscribe, fetch what the stream missed.
    async fn catch_up(
        &self,
        resumed: bool,
        cursor: &mut Option<u64>,
        out: &mpsc::Sender<RawLog>,
    ) -> Result<(), Stop> {
        if !resumed {
            match self.client.block_number().await {
                Ok(head) => *cursor = Some(head),
                Err(e) => tracing::warn!(error = %e, "could not read head block; an outage before the first live log is not backfilled"),
            }
            return Ok(());
        }

        let Some(from) = *cursor else {
            return Ok(());
        };
        let head = self
            .client
            .block_number()
            .await
            .map_err(|e| Stop::Dropped(e.to_string()))?;
        if from > head {
            return Ok(());
        }

        let scanner = HistoricalScanner::new(
            Arc::clone(&self.client),
            Arc::clone(&self.progress),
            self.gap_chunk,
        )
        .reporting_as(Producer::Live);
        match scanner.scan(self.address, from, head, out).await {
            Ok(summary) => {
                tracing::info!(from, to = head, logs = summary.logs, "filled subscription gap");
                *cursor = Some(head);
                Ok(())
            }
            Err(ScanError::ChannelClosed) => Err(Stop::ChannelClosed),
            Err(e) => Err(Stop::Dropped(e.to_string())),
        }
    }

    async fn stream(
        &self,
        sub: &mut LogSubscription,
        cursor: &mut Option<u64>,
        out: &mpsc::Sender<RawLog>,
    ) -> Stop {
        loop {
            match sub.next().await {
                Some(Ok(log)) => {
                    if log.removed {
                        continue;
                    }
                    let block = log.block_number;
                    self.progress.enqueue(block);
                    if out.send(log).await.is_err() {
                        self.progress.release(block);
                        return Stop::ChannelClosed;
                    }
                    *cursor = (*cursor).max(Some(block));
                    if let Err(e) = self.progress.covered(Producer::Live, block).await {
                        tracing::warn!(error = %e, block, "checkpoint update failed");
                    }
                }
                // one bad notification is not a broken subscription
                Some(Err(TransportError::Malformed(reason))) => {
                    tracing::warn!(%reason, subscription = %sub.id(), "dropping malformed log notification");
                }
                Some(Err(e)) => return Stop::Dropped(e.to_string()),
                None => return Stop::Dropped(TransportError::Closed.to_string()),
            }
        }
    }
}
