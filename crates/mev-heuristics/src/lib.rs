//! MEV heuristics: per-transaction classification, block-local sandwich
//! detection, cross-block clustering and result aggregation.

pub mod aggregator;
pub mod analyzer;
pub mod classifier;
pub mod cluster;
pub mod sandwich;

pub use aggregator::Aggregator;
pub use analyzer::{BlockAnalysis, BlockAnalyzer};
pub use classifier::classify;
pub use cluster::ClusterEngine;
pub use sandwich::detect_sandwiches;
