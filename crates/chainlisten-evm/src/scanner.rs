//! Historical range scanner.
//!
//! Walks `[from, to]` in chunks of at most `chunk_size` blocks, one
//! `eth_getLogs` per chunk, and pushes every log onto the ingestion channel
//! in node order. Each log is registered with [`Progress`] before it is sent,
//! and after a chunk is fully enqueued its end is reported as covered; the
//! checkpoint itself only moves once the workers are done with those logs.
//! A failing node call aborts the scan; the caller decides what to do with
//! that.

use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::mpsc;

use chainlisten_core::error::ScanError;
use chainlisten_core::progress::{Producer, Progress};
use chainlisten_core::types::{EventFilter, RawLog};

use crate::client::NodeClient;

/// Counters for a completed scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub chunks: u64,
    pub logs: u64,
    /// Logs flagged `removed` by the node and skipped.
    pub skipped: u64,
}

pub struct HistoricalScanner<C> {
    client: Arc<C>,
    progress: Arc<Progress>,
    chunk_size: u64,
    producer: Producer,
}

impl<C: NodeClient> HistoricalScanner<C> {
    pub fn new(client: Arc<C>, progress: Arc<Progress>, chunk_size: u64) -> Self {
        Self {
            client,
            progress,
            chunk_size: chunk_size.max(1),
            producer: Producer::Backfill,
        }
    }

    /// Report coverage as `producer`. The live subscriber uses
    /// [`Producer::Live`] when it fills a gap left by an outage.
    pub fn reporting_as(mut self, producer: Producer) -> Self {
        self.producer = producer;
        self
    }

    /// Scan `[from, to]` inclusive for logs of `address` and send them to
    /// `out`. Blocks while `out` is full.
    pub async fn scan(
        &self,
        address: Address,
        from: u64,
        to: u64,
        out: &mpsc::Sender<RawLog>,
    ) -> Result<ScanSummary, ScanError> {
        EventFilter::for_address(address)
            .from_block(from)
            .to_block(to)
            .validate()?;

        tracing::debug!(%address, from, to, chunk_size = self.chunk_size, producer = ?self.producer, "scanning range");

        let mut summary = ScanSummary::default();
        let mut start = from;
        loop {
            let end = start.saturating_add(self.chunk_size - 1).min(to);
            let filter = EventFilter::for_address(address)
                .from_block(start)
                .to_block(end);

            let logs = self
                .client
                .get_logs(&filter)
                .await
                .map_err(|source| ScanError::Rpc {
                    from: start,
                    to: end,
                    source,
                })?;

            let fetched = logs.len();
            for log in logs {
                if log.removed {
                    summary.skipped += 1;
                    continue;
                }
                let block = log.block_number;
                self.progress.enqueue(block);
                if out.send(log).await.is_err() {
                    self.progress.release(block);
                    return Err(ScanError::ChannelClosed);
                }
                summary.logs += 1;
            }
            self.progress.covered(self.producer, end).await?;
            summary.chunks += 1;
            tracing::debug!(from = start, to = end, fetched, "scanned chunk");

            if end >= to {
                break;
            }
            start = end + 1;
        }

        tracing::debug!(from, to, chunks = summary.chunks, logs = summary.logs, "range scanned");
        Ok(summary)
    }
}
