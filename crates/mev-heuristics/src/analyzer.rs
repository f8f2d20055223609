//! Per-block analysis: classification followed by sandwich detection.

use std::collections::HashMap;

use alloy::primitives::TxHash;
use mev_scan_types::{Block, BlockRecord, Failure, Flag, FlaggedTransaction, SandwichIncident, ScanConfig};
use tracing::{debug, warn};

use crate::classifier::{block_gas_threshold, classify_with_gas_threshold};
use crate::sandwich::detect_sandwiches;

/// Everything one block contributes to a scan.
///
/// Depends only on the block itself and the scan config, so blocks can be
/// analyzed concurrently and in any order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAnalysis {
    pub block_number: u64,
    pub timestamp: u64,
    /// Transactions that passed validation.
    pub transactions_seen: u64,
    /// HighGas threshold in effect for this block.
    pub gas_threshold: f64,
    /// Flagged transactions in execution order.
    pub flagged: Vec<FlaggedTransaction>,
    pub sandwiches: Vec<SandwichIncident>,
    /// Records dropped during validation.
    pub failures: Vec<Failure>,
}

/// Analyzer for detecting MEV patterns in a block.
pub struct BlockAnalyzer;

impl BlockAnalyzer {
    /// Validate a raw block record, then analyze what survives.
    ///
    /// # Arguments
    /// * `record` - The block as delivered by the feed
    /// * `config` - Scan configuration
    pub fn analyze_record(record: BlockRecord, config: &ScanConfig) -> BlockAnalysis {
        let (block, rejected) = record.into_block();

        let failures = rejected
            .into_iter()
            .map(|r| {
                warn!(
                    block = block.number,
                    position = r.position,
                    hash = %r.hash,
                    error = %r.error,
                    "Skipping malformed transaction"
                );
                Failure::Parse {
                    block_number: block.number,
                    position: r.position,
                    hash: r.hash,
                    message: r.error.to_string(),
                }
            })
            .collect();

        BlockAnalysis {
            failures,
            ..Self::analyze(&block, config)
        }
    }

    /// Analyze a validated block.
    ///
    /// # Arguments
    /// * `block` - The block, transactions in execution order
    /// * `config` - Scan configuration
    ///
    /// # Returns
    /// Flagged transactions and sandwich incidents for the block
    pub fn analyze(block: &Block, config: &ScanConfig) -> BlockAnalysis {
        let gas_threshold = block_gas_threshold(block, &config.thresholds);

        let classifier_flags: Vec<Flag> = block
            .transactions()
            .iter()
            .flat_map(|tx| classify_with_gas_threshold(tx, &config.thresholds, gas_threshold))
            .collect();

        let detection = detect_sandwiches(block, &classifier_flags, &config.sandwich);

        let mut by_hash: HashMap<TxHash, Vec<Flag>> = HashMap::new();
        for flag in classifier_flags.into_iter().chain(detection.flags) {
            by_hash.entry(flag.tx_hash).or_default().push(flag);
        }

        let flagged: Vec<FlaggedTransaction> = block
            .transactions()
            .iter()
            .filter_map(|tx| {
                let flags = by_hash.remove(&tx.hash)?;
                let mut flagged = FlaggedTransaction::new(tx.clone());
                for flag in flags {
                    let kind = flag.kind;
                    if !flagged.push(flag) {
                        warn!(hash = %tx.hash, kind = kind.as_str(), "Dropping conflicting flag");
                    }
                }
                Some(flagged)
            })
            .collect();

        debug!(
            block = block.number,
            transactions = block.len(),
            flagged = flagged.len(),
            sandwiches = detection.incidents.len(),
            gas_threshold,
            "Analyzed block"
        );

        BlockAnalysis {
            block_number: block.number,
            timestamp: block.timestamp,
            transactions_seen: block.len() as u64,
            gas_threshold,
            flagged,
            sandwiches: detection.incidents,
            failures: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mev_scan_types::{FlagKind, SandwichRole, TransactionRecord};

    fn record(n: u64, sender: u64, gas_price: f64, position: u64) -> TransactionRecord {
        TransactionRecord {
            hash: format!("0x{n:064x}"),
            sender: format!("0x{sender:040x}"),
            receiver: Some(format!("0x{:040x}", 0xaa)),
            gas_price,
            gas_used: 1.0,
            value: 1.0,
            block_number: 5,
            position_in_block: position,
        }
    }

    #[test]
    fn test_analyze_sandwich_block() {
        let record = BlockRecord {
            number: 5,
            timestamp: 1_700_000_000,
            transactions: vec![
                record(1, 0x1, 100.0, 0),
                record(2, 0x2, 80.0, 1),
                record(3, 0x1, 100.0, 2),
            ],
        };
        let analysis = BlockAnalyzer::analyze_record(record, &ScanConfig::default());

        assert_eq!(analysis.transactions_seen, 3);
        assert_eq!(analysis.flagged.len(), 2);
        assert_eq!(
            analysis.flagged[0].sandwich_role(),
            Some(SandwichRole::Front)
        );
        assert_eq!(analysis.flagged[1].sandwich_role(), Some(SandwichRole::Back));
        assert_eq!(analysis.sandwiches.len(), 1);
        assert!(analysis.failures.is_empty());
    }

    #[test]
    fn test_analyze_combines_flags() {
        let mut config = ScanConfig::default();
        config.thresholds.gas_threshold = 90.0;
        let block = BlockRecord {
            number: 5,
            timestamp: 0,
            transactions: vec![
                record(1, 0x1, 100.0, 0),
                record(2, 0x2, 80.0, 1),
                record(3, 0x1, 100.0, 2),
            ],
        };
        let analysis = BlockAnalyzer::analyze_record(block, &config);
        let front = &analysis.flagged[0];
        assert!(front.has_kind(FlagKind::HighGas));
        assert!(front.has_kind(FlagKind::SandwichLeg(SandwichRole::Front)));
        assert!(analysis.sandwiches[0].corroborated);
    }

    #[test]
    fn test_malformed_record_reported() {
        let mut bad = record(2, 0x2, 80.0, 1);
        bad.gas_price = f64::NAN;
        let block = BlockRecord {
            number: 5,
            timestamp: 0,
            transactions: vec![record(1, 0x1, 100.0, 0), bad],
        };
        let analysis = BlockAnalyzer::analyze_record(block, &ScanConfig::default());
        assert_eq!(analysis.transactions_seen, 1);
        assert_eq!(analysis.failures.len(), 1);
        assert!(matches!(
            analysis.failures[0],
            Failure::Parse { block_number: 5, position: 1, .. }
        ));
    }

    #[test]
    fn test_empty_block_yields_nothing() {
        let block = Block::new(9, 0, Vec::new());
        let analysis = BlockAnalyzer::analyze(&block, &ScanConfig::default());
        assert!(analysis.flagged.is_empty());
        assert!(analysis.sandwiches.is_empty());
        assert_eq!(analysis.transactions_seen, 0);
    }
}
