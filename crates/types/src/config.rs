//! Scan configuration.
//!
//! One [`ScanConfig`] is built per scan and handed to every stage; nothing
//! reads ambient settings.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hard cap on the number of blocks a single scan may cover.
pub const MAX_BLOCKS_PER_SCAN: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_num_blocks")]
    pub num_blocks_to_scan: u64,
    /// Highest block to scan; the scan walks backwards from here. `None`
    /// means the feed's latest block.
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default = "default_budget_seconds")]
    pub scan_time_budget_seconds: u64,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub sandwich: SandwichPolicy,
    #[serde(default)]
    pub clustering: ClusterPolicy,
    #[serde(default)]
    pub fetch: FetchConfig,
}

fn default_num_blocks() -> u64 {
    50
}

fn default_budget_seconds() -> u64 {
    60
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            num_blocks_to_scan: default_num_blocks(),
            start_block: None,
            scan_time_budget_seconds: default_budget_seconds(),
            thresholds: Thresholds::default(),
            sandwich: SandwichPolicy::default(),
            clustering: ClusterPolicy::default(),
            fetch: FetchConfig::default(),
        }
    }
}

/// Which quantity the HighGas rule compares against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasMetric {
    #[default]
    Price,
    TotalCost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_gas_threshold")]
    pub gas_threshold: f64,
    #[serde(default)]
    pub gas_metric: GasMetric,
    /// When set, each block's HighGas threshold becomes this multiple of the
    /// block's median gas metric instead of `gas_threshold`.
    #[serde(default)]
    pub median_multiplier: Option<f64>,
    #[serde(default = "default_value_threshold")]
    pub value_threshold: f64,
    #[serde(default = "default_anomaly_ratio")]
    pub anomaly_ratio: f64,
    /// Floor for the value denominator of the anomaly ratio.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_gas_threshold() -> f64 {
    100.0
}

fn default_value_threshold() -> f64 {
    0.01
}

fn default_anomaly_ratio() -> f64 {
    1000.0
}

fn default_epsilon() -> f64 {
    1e-9
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            gas_threshold: default_gas_threshold(),
            gas_metric: GasMetric::default(),
            median_multiplier: None,
            value_threshold: default_value_threshold(),
            anomaly_ratio: default_anomaly_ratio(),
            epsilon: default_epsilon(),
        }
    }
}

/// Gas relationship required between the legs and the victim of a sandwich.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasOrdering {
    Any,
    /// Front leg pays at least the victim's gas price.
    #[default]
    FrontNotBelowVictim,
    /// Both legs pay strictly more than the victim.
    StrictBracket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SandwichPolicy {
    #[serde(default)]
    pub gas_ordering: GasOrdering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPolicy {
    /// Link transactions that hit the same receiver, not only the same sender.
    #[serde(default = "default_true")]
    pub link_receivers: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self {
            link_receivers: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_concurrency() -> usize {
    8
}

fn default_max_retries() -> usize {
    3
}

fn default_min_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ScanConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: ScanConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_blocks_to_scan == 0 || self.num_blocks_to_scan > MAX_BLOCKS_PER_SCAN {
            return Err(invalid(
                "num_blocks_to_scan",
                format!("must be between 1 and {MAX_BLOCKS_PER_SCAN}, got {}", self.num_blocks_to_scan),
            ));
        }
        if self.scan_time_budget_seconds == 0 {
            return Err(invalid("scan_time_budget_seconds", "must be positive".to_string()));
        }

        let t = &self.thresholds;
        non_negative("gas_threshold", t.gas_threshold)?;
        non_negative("value_threshold", t.value_threshold)?;
        non_negative("anomaly_ratio", t.anomaly_ratio)?;
        if !t.epsilon.is_finite() || t.epsilon <= 0.0 {
            return Err(invalid("epsilon", format!("must be positive, got {}", t.epsilon)));
        }
        if let Some(multiplier) = t.median_multiplier {
            if !multiplier.is_finite() || multiplier <= 0.0 {
                return Err(invalid(
                    "median_multiplier",
                    format!("must be positive, got {multiplier}"),
                ));
            }
        }

        let f = &self.fetch;
        if f.concurrency == 0 {
            return Err(invalid("fetch.concurrency", "must be at least 1".to_string()));
        }
        if f.min_backoff_ms > f.max_backoff_ms {
            return Err(invalid(
                "fetch.min_backoff_ms",
                format!("{} exceeds max_backoff_ms {}", f.min_backoff_ms, f.max_backoff_ms),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, format!("must be a finite non-negative number, got {value}")));
    }
    Ok(())
}
