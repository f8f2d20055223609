//! Fetch-and-analyze for a single block.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use mev_scan_heuristics::{BlockAnalysis, BlockAnalyzer};
use mev_scan_telemetry::Metrics;
use mev_scan_types::{Failure, ScanConfig};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::feed::BlockFeed;

/// What one block contributes to a scan.
#[derive(Debug)]
pub enum BlockOutcome {
    Analyzed(BlockAnalysis),
    /// The block could not be fetched, even after retries.
    Failed(Failure),
}

/// Fetches blocks with retry and runs the per-block analysis.
pub struct BlockProcessor {
    feed: Arc<dyn BlockFeed>,
    config: Arc<ScanConfig>,
    metrics: Metrics,
}

impl BlockProcessor {
    /// Create a new block processor.
    ///
    /// # Arguments
    /// * `feed` - Source of block records
    /// * `config` - Scan configuration shared by every block
    /// * `metrics` - Metrics collector
    pub fn new(feed: Arc<dyn BlockFeed>, config: Arc<ScanConfig>, metrics: Metrics) -> Self {
        Self {
            feed,
            config,
            metrics,
        }
    }

    /// Fetch and analyze one block.
    ///
    /// Transient feed errors are retried with exponential backoff; a block
    /// that still cannot be fetched becomes a [`Failure::Fetch`].
    pub async fn process_block(&self, block_number: u64) -> BlockOutcome {
        let fetch = &self.config.fetch;
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(fetch.max_retries)
            .with_min_delay(Duration::from_millis(fetch.min_backoff_ms))
            .with_max_delay(Duration::from_millis(fetch.max_backoff_ms));

        let start = Instant::now();
        let mut attempts = 1;
        let res = (|| async { self.feed.fetch_block(block_number).await })
            .retry(&retry_strategy)
            .when(|e| e.is_retryable())
            .notify(|err, dur| {
                warn!(
                    block = block_number,
                    attempt = attempts,
                    retry_in = ?dur,
                    error = %err,
                    "Block fetch failed, retrying"
                );
                self.metrics.inc_fetch_retries();
                attempts += 1;
            })
            .await;
        self.metrics
            .observe_fetch_latency("fetch_block", start.elapsed().as_secs_f64());

        match res {
            Ok(record) => {
                debug!(block = block_number, attempts, "Fetched block");
                BlockOutcome::Analyzed(BlockAnalyzer::analyze_record(record, &self.config))
            }
            Err(e) => {
                warn!(block = block_number, attempts, error = %e, "Giving up on block");
                BlockOutcome::Failed(Failure::Fetch {
                    block_number,
                    attempts,
                    message: e.to_string(),
                })
            }
        }
    }
}
