//! Result exports: the full scan result as JSON and flagged rows as CSV.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use mev_scan_types::ScanResult;
use serde::Serialize;
use tracing::info;

/// Write the complete scan result as pretty JSON, replacing any existing file.
///
/// # Arguments
/// * `path` - Destination file
/// * `result` - The scan result to serialize
pub fn write_result_json<P: AsRef<Path>>(path: P, result: &ScanResult) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    let mut file = File::create(path.as_ref())?;
    writeln!(file, "{}", json)?;
    info!(path = %path.as_ref().display(), "Wrote scan result");
    Ok(())
}

/// One CSV row per flagged transaction.
#[derive(Debug, Serialize)]
struct FlaggedRow {
    block_number: u64,
    position: u64,
    hash: String,
    sender: String,
    receiver: String,
    gas_price: f64,
    gas_used: f64,
    value: f64,
    flags: String,
    max_score: f64,
    cluster_id: Option<u64>,
}

/// Export flagged transactions in (block, position) order.
///
/// Returns the number of rows written.
pub fn write_flagged_csv<P: AsRef<Path>>(path: P, result: &ScanResult) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;

    for ft in &result.flagged {
        let tx = &ft.transaction;
        let flags = ft.flags();
        writer.serialize(FlaggedRow {
            block_number: tx.block_number,
            position: tx.position,
            hash: tx.hash.to_string(),
            sender: tx.sender.to_string(),
            receiver: tx.receiver.map(|r| r.to_string()).unwrap_or_default(),
            gas_price: tx.gas_price,
            gas_used: tx.gas_used,
            value: tx.value,
            flags: flags
                .iter()
                .map(|f| f.kind.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            max_score: flags.iter().map(|f| f.score).fold(0.0, f64::max),
            cluster_id: flags.first().and_then(|f| f.cluster_id),
        })?;
    }

    writer.flush()?;
    info!(path = %path.as_ref().display(), rows = result.flagged.len(), "Wrote flagged transactions");
    Ok(result.flagged.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mev_scan_types::{
        Address, BlockThreshold, Flag, FlagCounts, FlagKind, FlaggedTransaction, ScanStatus, Transaction, TxHash,
    };

    fn result() -> ScanResult {
        let tx = Transaction {
            hash: TxHash::with_last_byte(1),
            sender: Address::with_last_byte(2),
            receiver: None,
            gas_price: 150.0,
            gas_used: 21_000.0,
            value: 0.5,
            block_number: 10,
            position: 3,
        };
        let mut flagged = FlaggedTransaction::new(tx.clone());
        flagged.push(Flag::new(tx.hash, FlagKind::HighGas, 1.5));
        flagged.push(Flag::new(tx.hash, FlagKind::Anomalous, 2000.0));
        let mut counts = FlagCounts::default();
        counts.record(FlagKind::HighGas);
        counts.record(FlagKind::Anomalous);

        ScanResult {
            status: ScanStatus::Complete,
            blocks_requested: 1,
            blocks_completed: vec![10],
            time_range: None,
            block_thresholds: vec![BlockThreshold {
                block_number: 10,
                gas_threshold: 100.0,
            }],
            transactions_seen: 1,
            counts,
            flagged: vec![flagged],
            clusters: Vec::new(),
            unclustered: vec![tx.hash],
            sandwiches: Vec::new(),
            failures: Vec::new(),
            elapsed_ms: 1,
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mev-scan-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_json_round_trips() {
        let path = temp_path("result.json");
        let result = result();
        write_result_json(&path, &result).unwrap();
        let parsed: ScanResult =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, result);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_csv_rows() {
        let path = temp_path("flagged.csv");
        assert_eq!(write_flagged_csv(&path, &result()).unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("block_number,position,hash"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("10,3,0x"));
        assert!(row.contains("high_gas;anomalous"));
        assert!(row.contains(",2000.0,"));
        std::fs::remove_file(path).unwrap();
    }
}
