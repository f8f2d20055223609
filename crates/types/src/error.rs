//! Error types shared across the scan pipeline.

use alloy::primitives::TxHash;

/// A transaction record that cannot enter the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid transaction hash {0:?}")]
    InvalidHash(String),
    #[error("invalid {field} address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} is not finite")]
    NonFinite { field: &'static str },
    #[error("{field} is negative: {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("transaction declares block {found}, expected {expected}")]
    BlockMismatch { expected: u64, found: u64 },
    #[error("duplicate position {0} in block")]
    DuplicatePosition(u64),
    #[error("duplicate transaction hash {0}")]
    DuplicateHash(TxHash),
}

/// Errors raised by a block feed adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("block {0} not available")]
    NotFound(u64),
}

impl FeedError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Transport(_) | FeedError::Rpc(_))
    }
}

/// Invalid or unreadable scan configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
