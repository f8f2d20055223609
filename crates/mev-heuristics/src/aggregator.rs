//! Scan-wide accumulation of block analyses.
//!
//! The aggregator owns the cluster engine and every running counter. It has
//! exactly one writer: whoever drives the scan applies whole
//! [`BlockAnalysis`] values one at a time, so a snapshot never observes half
//! of a block.

use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use mev_scan_types::config::ClusterPolicy;
use mev_scan_types::result::TimeRange;
use mev_scan_types::{
    BlockThreshold, Failure, FlagCounts, FlaggedTransaction, SandwichIncident, ScanResult, ScanSnapshot, ScanStatus,
};
use tracing::{debug, warn};

use crate::analyzer::BlockAnalysis;
use crate::cluster::ClusterEngine;

pub struct Aggregator {
    blocks_requested: u64,
    /// Completed block number -> timestamp.
    blocks_completed: BTreeMap<u64, u64>,
    /// Completed block number -> HighGas threshold used.
    gas_thresholds: BTreeMap<u64, f64>,
    failed_blocks: BTreeSet<u64>,
    transactions_seen: u64,
    counts: FlagCounts,
    /// Keyed by (block, position).
    flagged: BTreeMap<(u64, u64), FlaggedTransaction>,
    sandwiches: Vec<SandwichIncident>,
    failures: Vec<Failure>,
    clusters: ClusterEngine,
}

impl Aggregator {
    pub fn new(blocks_requested: u64, policy: ClusterPolicy) -> Self {
        Self {
            blocks_requested,
            blocks_completed: BTreeMap::new(),
            gas_thresholds: BTreeMap::new(),
            failed_blocks: BTreeSet::new(),
            transactions_seen: 0,
            counts: FlagCounts::default(),
            flagged: BTreeMap::new(),
            sandwiches: Vec::new(),
            failures: Vec::new(),
            clusters: ClusterEngine::new(policy),
        }
    }

    /// Apply one block's analysis.
    ///
    /// Returns `false` if the block was already applied; the analysis is then
    /// discarded so nothing is counted twice.
    pub fn apply(&mut self, analysis: BlockAnalysis) -> bool {
        if self.blocks_completed.contains_key(&analysis.block_number) {
            warn!(block = analysis.block_number, "Ignoring duplicate block analysis");
            return false;
        }

        self.clusters.assign(&analysis.flagged);

        for ft in analysis.flagged {
            for flag in ft.flags() {
                self.counts.record(flag.kind);
            }
            let key = (ft.transaction.block_number, ft.transaction.position);
            self.flagged.insert(key, ft);
        }

        self.transactions_seen += analysis.transactions_seen;
        self.sandwiches.extend(analysis.sandwiches);
        self.failures.extend(analysis.failures);
        self.blocks_completed
            .insert(analysis.block_number, analysis.timestamp);
        self.gas_thresholds
            .insert(analysis.block_number, analysis.gas_threshold);

        debug!(
            block = analysis.block_number,
            completed = self.blocks_completed.len(),
            requested = self.blocks_requested,
            clusters = self.clusters.cluster_count(),
            "Applied block analysis"
        );
        true
    }

    /// Record a failure that is not tied to a successfully analyzed block.
    pub fn record_failure(&mut self, failure: Failure) {
        if let Failure::Fetch { block_number, .. } = &failure {
            self.failed_blocks.insert(*block_number);
        }
        self.failures.push(failure);
    }

    pub fn blocks_completed(&self) -> u64 {
        self.blocks_completed.len() as u64
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Live counters.
    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            blocks_requested: self.blocks_requested,
            blocks_completed: self.blocks_completed(),
            blocks_failed: self.failed_blocks.len() as u64,
            transactions_seen: self.transactions_seen,
            flagged_transactions: self.flagged.len() as u64,
            counts: self.counts,
            cluster_count: self.clusters.cluster_count() as u64,
            sandwich_count: self.sandwiches.len() as u64,
            failure_count: self.failures.len() as u64,
        }
    }

    /// Consolidate everything applied so far into the final result.
    pub fn finish(mut self, status: ScanStatus, elapsed_ms: u64) -> ScanResult {
        let clusters = self.clusters.snapshot();

        let flagged: Vec<FlaggedTransaction> = self
            .flagged
            .into_values()
            .map(|mut ft| {
                ft.assign_cluster(clusters.membership.get(&ft.hash()).copied());
                ft
            })
            .collect();

        let mut sandwiches = self.sandwiches;
        sandwiches.sort_by_key(|s| (s.block_number, s.victim_position));

        let mut failures = self.failures;
        failures.sort_by_key(|f| f.block_number().unwrap_or(u64::MAX));

        let time_range = self
            .blocks_completed
            .values()
            .min()
            .zip(self.blocks_completed.values().max())
            .and_then(|(&start, &end)| {
                Some(TimeRange {
                    start: DateTime::from_timestamp(i64::try_from(start).ok()?, 0)?,
                    end: DateTime::from_timestamp(i64::try_from(end).ok()?, 0)?,
                })
            });

        let block_thresholds = self
            .gas_thresholds
            .into_iter()
            .map(|(block_number, gas_threshold)| BlockThreshold {
                block_number,
                gas_threshold,
            })
            .collect();

        ScanResult {
            status,
            blocks_requested: self.blocks_requested,
            blocks_completed: self.blocks_completed.keys().copied().collect(),
            time_range,
            block_thresholds,
            transactions_seen: self.transactions_seen,
            counts: self.counts,
            flagged,
            clusters: clusters.clusters,
            unclustered: clusters.unclustered,
            sandwiches,
            failures,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::BlockAnalyzer;
    use chrono::Utc;
    use alloy::primitives::{Address, TxHash};
    use mev_scan_types::{Block, FlagKind, ScanConfig, Transaction};

    fn tx(n: u8, sender: u8, gas_price: f64, block: u64, position: u64) -> Transaction {
        Transaction {
            hash: TxHash::with_last_byte(n),
            sender: Address::with_last_byte(sender),
            receiver: Some(Address::with_last_byte(0xaa)),
            gas_price,
            gas_used: 1.0,
            value: 1.0,
            block_number: block,
            position,
        }
    }

    fn analyses(config: &ScanConfig) -> Vec<BlockAnalysis> {
        vec![
            BlockAnalyzer::analyze(
                &Block::new(
                    1,
                    1_700_000_000,
                    vec![tx(1, 1, 100.0, 1, 0), tx(2, 2, 80.0, 1, 1), tx(3, 1, 100.0, 1, 2)],
                ),
                config,
            ),
            BlockAnalyzer::analyze(
                &Block::new(
                    2,
                    1_700_000_012,
                    vec![Transaction {
                        receiver: Some(Address::with_last_byte(0xbb)),
                        ..tx(4, 9, 500.0, 2, 0)
                    }],
                ),
                config,
            ),
            BlockAnalyzer::analyze(&Block::new(3, 1_700_000_024, Vec::new()), config),
        ]
    }

    #[test]
    fn test_counts_and_result() {
        let config = ScanConfig::default();
        let mut aggregator = Aggregator::new(3, config.clustering);
        for analysis in analyses(&config) {
            assert!(aggregator.apply(analysis));
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.blocks_requested, 3);
        assert_eq!(snapshot.blocks_completed, 3);
        assert_eq!(snapshot.transactions_seen, 4);
        assert_eq!(snapshot.counts.sandwich_front, 1);
        assert_eq!(snapshot.counts.sandwich_back, 1);
        assert_eq!(snapshot.counts.high_gas, 1);
        assert_eq!(snapshot.cluster_count, 1);

        let result = aggregator.finish(ScanStatus::Complete, 5);
        assert_eq!(result.blocks_requested, 3);
        assert_eq!(result.blocks_completed, vec![1, 2, 3]);
        assert_eq!(result.flagged.len(), 3);
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].members, vec![TxHash::with_last_byte(1), TxHash::with_last_byte(3)]);
        assert!(result.clusters[0].addresses.contains(&Address::with_last_byte(1)));
        assert_eq!(result.unclustered, vec![TxHash::with_last_byte(4)]);
        assert_eq!(result.flagged[0].flags()[0].cluster_id, Some(1));
        assert_eq!(result.flagged[2].flags()[0].kind, FlagKind::HighGas);
        assert_eq!(result.flagged[2].flags()[0].cluster_id, None);
        let range = result.time_range.unwrap();
        assert_eq!(range.start.timestamp(), 1_700_000_000);
        assert_eq!(range.end.timestamp(), 1_700_000_024);
        let thresholds: Vec<u64> = result.block_thresholds.iter().map(|t| t.block_number).collect();
        assert_eq!(thresholds, vec![1, 2, 3]);
        assert!(result
            .block_thresholds
            .iter()
            .all(|t| t.gas_threshold == config.thresholds.gas_threshold));
    }

    #[test]
    fn test_dynamic_thresholds_reach_result() {
        let mut config = ScanConfig::default();
        config.thresholds.median_multiplier = Some(2.0);
        let mut aggregator = Aggregator::new(3, config.clustering);
        for analysis in analyses(&config).into_iter().rev() {
            aggregator.apply(analysis);
        }

        let result = aggregator.finish(ScanStatus::Complete, 0);
        let thresholds: Vec<(u64, f64)> = result
            .block_thresholds
            .iter()
            .map(|t| (t.block_number, t.gas_threshold))
            .collect();
        // Block 1 median is 100, block 2 has one tx at 500, block 3 is empty.
        assert_eq!(
            thresholds,
            vec![(1, 200.0), (2, 1000.0), (3, config.thresholds.gas_threshold)]
        );
        assert_eq!(
            result.gas_threshold_range(),
            Some((config.thresholds.gas_threshold.min(200.0), 1000.0))
        );
    }

    #[test]
    fn test_result_independent_of_apply_order() {
        let config = ScanConfig::default();
        let mut forward = Aggregator::new(3, config.clustering);
        for analysis in analyses(&config) {
            forward.apply(analysis);
        }
        let mut backward = Aggregator::new(3, config.clustering);
        for analysis in analyses(&config).into_iter().rev() {
            backward.apply(analysis);
        }

        let mut a = forward.finish(ScanStatus::Complete, 0);
        let mut b = backward.finish(ScanStatus::Complete, 0);
        for cluster in a.clusters.iter_mut().chain(b.clusters.iter_mut()) {
            cluster.created_at = DateTime::<Utc>::UNIX_EPOCH;
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_block_ignored() {
        let config = ScanConfig::default();
        let mut aggregator = Aggregator::new(3, config.clustering);
        let first = analyses(&config).remove(0);
        assert!(aggregator.apply(first.clone()));
        assert!(!aggregator.apply(first));
        assert_eq!(aggregator.snapshot().counts.total(), 2);
    }

    #[test]
    fn test_failures_are_kept() {
        let mut aggregator = Aggregator::new(2, ClusterPolicy::default());
        aggregator.record_failure(Failure::Fetch {
            block_number: 7,
            attempts: 4,
            message: "timeout".to_string(),
        });
        assert_eq!(aggregator.snapshot().blocks_failed, 1);
        let result = aggregator.finish(ScanStatus::Partial, 0);
        assert_eq!(result.failures.len(), 1);
        assert!(result.flagged.is_empty());
        assert!(result.time_range.is_none());
    }
}
