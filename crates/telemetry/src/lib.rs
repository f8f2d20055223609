//! Observability for MEV scans: logging, metrics and result exports.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::Metrics;
