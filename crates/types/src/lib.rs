//! Shared data model, configuration and result types for MEV scans.

pub mod config;
pub mod error;
pub mod models;
pub mod record;
pub mod result;

pub use config::ScanConfig;
pub use error::{ConfigError, FeedError, ParseError};
pub use models::{
    Block, ClusterSummary, Flag, FlagKind, FlaggedTransaction, SandwichIncident, SandwichRole,
    Transaction,
};
pub use record::{BlockRecord, TransactionRecord};
pub use result::{BlockThreshold, Failure, FlagCounts, ScanResult, ScanSnapshot, ScanStatus, TimeRange};

pub use alloy::primitives::{Address, TxHash};
