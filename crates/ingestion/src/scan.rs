//! Scan orchestration.
//!
//! Blocks are fetched and analyzed concurrently by a producer task. Each
//! finished [`BlockOutcome`] is sent to the collector loop in
//! [`ScanSession::run`], the only code that touches the aggregator. The
//! collector applies whole outcomes, publishes a snapshot after each one and
//! stops on completion, cancellation or budget expiry. A failed block never
//! ends the scan; the feed counts as down only when the head lookup fails or
//! every requested block failed.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use mev_scan_heuristics::{Aggregator, BlockAnalysis};
use mev_scan_telemetry::Metrics;
use mev_scan_types::{ConfigError, Failure, ScanConfig, ScanResult, ScanSnapshot, ScanStatus};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::block_processor::{BlockOutcome, BlockProcessor};
use crate::feed::BlockFeed;

/// One bounded scan over the most recent blocks of a feed.
pub struct ScanSession {
    feed: Arc<dyn BlockFeed>,
    config: Arc<ScanConfig>,
    metrics: Metrics,
    cancel: CancellationToken,
    snapshots: watch::Sender<ScanSnapshot>,
}

impl ScanSession {
    /// Create a scan session.
    ///
    /// # Arguments
    /// * `feed` - Source of block records
    /// * `config` - Scan configuration, validated here
    /// * `metrics` - Metrics collector
    pub fn new(
        feed: Arc<dyn BlockFeed>,
        config: ScanConfig,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (snapshots, _) = watch::channel(ScanSnapshot {
            blocks_requested: config.num_blocks_to_scan,
            ..ScanSnapshot::default()
        });
        Ok(Self {
            feed,
            config: Arc::new(config),
            metrics,
            cancel: CancellationToken::new(),
            snapshots,
        })
    }

    /// Live counters, updated after every applied block.
    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.snapshots.subscribe()
    }

    /// Token that stops the scan when cancelled. Work already applied is
    /// kept in the result.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the scan to completion, cancellation or budget expiry.
    pub async fn run(self) -> ScanResult {
        let started = Instant::now();
        let budget = Duration::from_secs(self.config.scan_time_budget_seconds);
        let deadline = started + budget;

        let head = match self.config.start_block {
            Some(block) => Ok(block),
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        return self.abort(ScanStatus::Cancelled, Failure::Cancelled {
                            blocks_completed: 0,
                            blocks_requested: self.config.num_blocks_to_scan,
                        }, started);
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        return self.abort(ScanStatus::BudgetExceeded, Failure::BudgetExceeded {
                            budget_seconds: self.config.scan_time_budget_seconds,
                            blocks_completed: 0,
                            blocks_requested: self.config.num_blocks_to_scan,
                        }, started);
                    }
                    head = self.feed.latest_block_number() => head,
                }
            }
        };

        let head = match head {
            Ok(head) => head,
            Err(e) => {
                error!(error = %e, "Could not determine the latest block");
                return self.abort(
                    ScanStatus::AdapterOutage,
                    Failure::AdapterOutage {
                        message: format!("head lookup failed: {e}"),
                    },
                    started,
                );
            }
        };

        let block_numbers: Vec<u64> = (0..self.config.num_blocks_to_scan)
            .filter_map(|i| head.checked_sub(i))
            .collect();
        let requested = block_numbers.len() as u64;

        info!(
            head,
            blocks = requested,
            budget_seconds = self.config.scan_time_budget_seconds,
            concurrency = self.config.fetch.concurrency,
            "Starting scan"
        );

        let mut aggregator = Aggregator::new(requested, self.config.clustering);
        self.snapshots.send_replace(aggregator.snapshot());

        let concurrency = self.config.fetch.concurrency;
        let (tx, mut rx) = mpsc::channel(concurrency);
        let stop = self.cancel.child_token();
        let producer = tokio::spawn(produce(
            BlockProcessor::new(self.feed.clone(), self.config.clone(), self.metrics.clone()),
            block_numbers,
            concurrency,
            tx,
            stop.clone(),
        ));

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let status = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(completed = aggregator.blocks_completed(), requested, "Scan cancelled");
                    aggregator.record_failure(Failure::Cancelled {
                        blocks_completed: aggregator.blocks_completed(),
                        blocks_requested: requested,
                    });
                    break ScanStatus::Cancelled;
                }
                _ = &mut sleep => {
                    warn!(completed = aggregator.blocks_completed(), requested, "Scan time budget exceeded");
                    aggregator.record_failure(Failure::BudgetExceeded {
                        budget_seconds: self.config.scan_time_budget_seconds,
                        blocks_completed: aggregator.blocks_completed(),
                        blocks_requested: requested,
                    });
                    break ScanStatus::BudgetExceeded;
                }
                outcome = rx.recv() => match outcome {
                    Some(BlockOutcome::Analyzed(analysis)) => {
                        self.record_metrics(&analysis);
                        aggregator.apply(analysis);
                        self.snapshots.send_replace(aggregator.snapshot());
                    }
                    Some(BlockOutcome::Failed(failure)) => {
                        self.metrics.inc_blocks_failed();
                        aggregator.record_failure(failure);
                        self.snapshots.send_replace(aggregator.snapshot());
                    }
                    None => {
                        break if aggregator.blocks_completed() == 0 && requested > 0 {
                            error!(requested, "No block could be retrieved from the feed");
                            aggregator.record_failure(Failure::AdapterOutage {
                                message: "no block could be retrieved".to_string(),
                            });
                            ScanStatus::AdapterOutage
                        } else if aggregator.has_failures() {
                            ScanStatus::Partial
                        } else {
                            ScanStatus::Complete
                        };
                    }
                },
            }
        };

        stop.cancel();
        drop(rx);
        if let Err(e) = producer.await {
            error!(error = %e, "Block producer task failed");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = aggregator.finish(status, elapsed_ms);
        info!(
            status = status.as_str(),
            blocks_completed = result.blocks_completed.len(),
            transactions = result.transactions_seen,
            flagged = result.flagged.len(),
            clusters = result.clusters.len(),
            sandwiches = result.sandwiches.len(),
            failures = result.failures.len(),
            elapsed_ms,
            "Scan finished"
        );
        result
    }

    fn record_metrics(&self, analysis: &BlockAnalysis) {
        self.metrics.inc_blocks_scanned();
        self.metrics
            .inc_transactions_classified(analysis.transactions_seen);
        self.metrics
            .inc_parse_errors(analysis.failures.len() as u64);
        for flag in analysis.flagged.iter().flat_map(|ft| ft.flags()) {
            self.metrics.inc_flag(flag.kind);
        }
    }

    /// Result for a scan that ended before any block was requested.
    fn abort(&self, status: ScanStatus, failure: Failure, started: Instant) -> ScanResult {
        let mut aggregator = Aggregator::new(self.config.num_blocks_to_scan, self.config.clustering);
        aggregator.record_failure(failure);
        self.snapshots.send_replace(aggregator.snapshot());
        aggregator.finish(status, started.elapsed().as_millis() as u64)
    }
}

/// Fetch and analyze blocks, at most `concurrency` at a time, forwarding
/// outcomes in completion order until done, stopped, or the collector hangs up.
async fn produce(
    processor: BlockProcessor,
    block_numbers: Vec<u64>,
    concurrency: usize,
    tx: mpsc::Sender<BlockOutcome>,
    stop: CancellationToken,
) {
    let processor = &processor;
    let mut outcomes = stream::iter(block_numbers)
        .map(|block_number| processor.process_block(block_number))
        .buffer_unordered(concurrency);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            next = outcomes.next() => match next {
                Some(outcome) => {
                    if tx.send(outcome).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use mev_scan_types::BlockRecord;

    fn empty_block(number: u64) -> BlockRecord {
        BlockRecord {
            number,
            timestamp: 1_700_000_000 + number * 12,
            transactions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_scans_back_from_head() {
        let feed = Arc::new(MemoryFeed::new((0..10).map(empty_block)));
        let config = ScanConfig {
            num_blocks_to_scan: 3,
            ..ScanConfig::default()
        };
        let session = ScanSession::new(feed, config, Metrics::new().unwrap()).unwrap();
        let result = session.run().await;

        assert_eq!(result.status, ScanStatus::Complete);
        assert_eq!(result.blocks_completed, vec![7, 8, 9]);
        assert_eq!(result.block_range(), Some((7, 9)));
    }

    #[tokio::test]
    async fn test_stops_at_genesis() {
        let feed = Arc::new(MemoryFeed::new((0..3).map(empty_block)));
        let config = ScanConfig {
            num_blocks_to_scan: 10,
            ..ScanConfig::default()
        };
        let result = ScanSession::new(feed, config, Metrics::new().unwrap())
            .unwrap()
            .run()
            .await;

        assert_eq!(result.blocks_requested, 3);
        assert_eq!(result.blocks_completed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let feed = Arc::new(MemoryFeed::new([empty_block(1)]));
        let config = ScanConfig {
            num_blocks_to_scan: 101,
            ..ScanConfig::default()
        };
        assert!(ScanSession::new(feed, config, Metrics::new().unwrap()).is_err());
    }
}
