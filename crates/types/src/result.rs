//! What a scan hands to the presentation layer.

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BlockNumber, ClusterSummary, FlagKind, FlaggedTransaction, SandwichIncident, SandwichRole};

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Every requested block was processed.
    Complete,
    /// Every requested block was attempted, some failed.
    Partial,
    BudgetExceeded,
    Cancelled,
    /// No blocks could be retrieved.
    AdapterOutage,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Complete => "complete",
            ScanStatus::Partial => "partial",
            ScanStatus::BudgetExceeded => "budget_exceeded",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::AdapterOutage => "adapter_outage",
        }
    }
}

/// A failure that cost the scan some of its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    Fetch {
        block_number: BlockNumber,
        attempts: usize,
        message: String,
    },
    Parse {
        block_number: BlockNumber,
        position: u64,
        hash: String,
        message: String,
    },
    BudgetExceeded {
        budget_seconds: u64,
        blocks_completed: u64,
        blocks_requested: u64,
    },
    Cancelled {
        blocks_completed: u64,
        blocks_requested: u64,
    },
    AdapterOutage {
        message: String,
    },
}

impl Failure {
    pub fn block_number(&self) -> Option<BlockNumber> {
        match self {
            Failure::Fetch { block_number, .. } | Failure::Parse { block_number, .. } => {
                Some(*block_number)
            }
            _ => None,
        }
    }
}

/// Running totals per flag kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagCounts {
    pub high_gas: u64,
    pub sandwich_front: u64,
    pub sandwich_back: u64,
    pub anomalous: u64,
}

impl FlagCounts {
    pub fn record(&mut self, kind: FlagKind) {
        match kind {
            FlagKind::HighGas => self.high_gas += 1,
            FlagKind::SandwichLeg(SandwichRole::Front) => self.sandwich_front += 1,
            FlagKind::SandwichLeg(SandwichRole::Back) => self.sandwich_back += 1,
            FlagKind::Anomalous => self.anomalous += 1,
        }
    }

    pub fn get(&self, kind: FlagKind) -> u64 {
        match kind {
            FlagKind::HighGas => self.high_gas,
            FlagKind::SandwichLeg(SandwichRole::Front) => self.sandwich_front,
            FlagKind::SandwichLeg(SandwichRole::Back) => self.sandwich_back,
            FlagKind::Anomalous => self.anomalous,
        }
    }

    pub fn total(&self) -> u64 {
        self.high_gas + self.sandwich_front + self.sandwich_back + self.anomalous
    }
}

/// Live counters, cheap to copy and publish while a scan runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub blocks_requested: u64,
    pub blocks_completed: u64,
    pub blocks_failed: u64,
    pub transactions_seen: u64,
    pub flagged_transactions: u64,
    pub counts: FlagCounts,
    pub cluster_count: u64,
    pub sandwich_count: u64,
    pub failure_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The HighGas threshold (gwei) a completed block was classified against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockThreshold {
    pub block_number: BlockNumber,
    pub gas_threshold: f64,
}

/// The consolidated outcome of a scan.
///
/// Every list is sorted so that two scans over the same blocks produce the
/// same result regardless of the order blocks completed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    pub blocks_requested: u64,
    /// Numbers of the blocks whose analysis was applied, ascending.
    pub blocks_completed: Vec<BlockNumber>,
    pub time_range: Option<TimeRange>,
    /// One entry per completed block, ascending.
    pub block_thresholds: Vec<BlockThreshold>,
    pub transactions_seen: u64,
    pub counts: FlagCounts,
    /// Ordered by (block, position).
    pub flagged: Vec<FlaggedTransaction>,
    pub clusters: Vec<ClusterSummary>,
    /// Flagged transactions that share no identity with any other.
    pub unclustered: Vec<TxHash>,
    pub sandwiches: Vec<SandwichIncident>,
    pub failures: Vec<Failure>,
    pub elapsed_ms: u64,
}

impl ScanResult {
    pub fn is_partial(&self) -> bool {
        self.status != ScanStatus::Complete
    }

    pub fn block_range(&self) -> Option<(BlockNumber, BlockNumber)> {
        Some((*self.blocks_completed.first()?, *self.blocks_completed.last()?))
    }

    /// Lowest and highest HighGas threshold applied across completed blocks.
    pub fn gas_threshold_range(&self) -> Option<(f64, f64)> {
        self.block_thresholds.iter().fold(None, |range, t| {
            let (lo, hi) = range.unwrap_or((t.gas_threshold, t.gas_threshold));
            Some((lo.min(t.gas_threshold), hi.max(t.gas_threshold)))
        })
    }
}
