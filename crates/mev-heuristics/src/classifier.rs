//! Per-transaction threshold heuristics.

use mev_scan_types::config::{GasMetric, Thresholds};
use mev_scan_types::{Block, Flag, FlagKind, Transaction};

/// Classify a transaction against the configured thresholds.
///
/// # Arguments
/// * `tx` - The transaction to classify
/// * `thresholds` - Scan thresholds
///
/// # Returns
/// The HighGas and Anomalous flags the transaction earns, if any
pub fn classify(tx: &Transaction, thresholds: &Thresholds) -> Vec<Flag> {
    classify_with_gas_threshold(tx, thresholds, thresholds.gas_threshold)
}

/// Same as [`classify`] with the HighGas threshold supplied by the caller,
/// e.g. one derived from the block median.
pub fn classify_with_gas_threshold(
    tx: &Transaction,
    thresholds: &Thresholds,
    gas_threshold: f64,
) -> Vec<Flag> {
    let mut flags = Vec::new();

    if let Some(score) = high_gas_score(tx, thresholds.gas_metric, gas_threshold) {
        flags.push(Flag::new(tx.hash, FlagKind::HighGas, score));
    }

    if let Some(score) = anomaly_score(tx, thresholds) {
        flags.push(Flag::new(tx.hash, FlagKind::Anomalous, score));
    }

    flags
}

pub fn gas_metric(tx: &Transaction, metric: GasMetric) -> f64 {
    match metric {
        GasMetric::Price => tx.gas_price,
        GasMetric::TotalCost => tx.gas_cost(),
    }
}

/// HighGas threshold for one block.
///
/// With a median multiplier configured the threshold tracks the block's own
/// fee level; an empty block or a zero median falls back to the fixed value.
pub fn block_gas_threshold(block: &Block, thresholds: &Thresholds) -> f64 {
    let Some(multiplier) = thresholds.median_multiplier else {
        return thresholds.gas_threshold;
    };

    let mut values: Vec<f64> = block
        .transactions()
        .iter()
        .map(|tx| gas_metric(tx, thresholds.gas_metric))
        .collect();

    if values.is_empty() {
        return thresholds.gas_threshold;
    }

    values.sort_by(f64::total_cmp);
    let median = if values.len() % 2 == 0 {
        (values[values.len() / 2 - 1] + values[values.len() / 2]) / 2.0
    } else {
        values[values.len() / 2]
    };

    if median > 0.0 {
        median * multiplier
    } else {
        thresholds.gas_threshold
    }
}

/// Score is how far above the threshold the transaction paid.
fn high_gas_score(tx: &Transaction, metric: GasMetric, threshold: f64) -> Option<f64> {
    let value = gas_metric(tx, metric);
    if value <= threshold {
        return None;
    }
    Some(if threshold > 0.0 { value / threshold } else { value })
}

/// Low-value transfers that still paid a lot for execution.
fn anomaly_score(tx: &Transaction, thresholds: &Thresholds) -> Option<f64> {
    if tx.value >= thresholds.value_threshold {
        return None;
    }
    let ratio = tx.gas_cost() / tx.value.max(thresholds.epsilon);
    (ratio > thresholds.anomaly_ratio).then_some(ratio)
}
