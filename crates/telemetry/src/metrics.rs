//! Prometheus metrics for MEV scans.

use mev_scan_types::FlagKind;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metrics collector for a scanner process.
///
/// Every instance owns its registry, so independent scans (and tests) never
/// collide on metric names.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    blocks_scanned: IntCounter,
    blocks_failed: IntCounter,
    transactions_classified: IntCounter,
    parse_errors: IntCounter,
    flags: IntCounterVec,
    fetch_retries: IntCounter,
    rpc_errors: IntCounter,
    fetch_latency: HistogramVec,
}

impl Metrics {
    /// Create a new metrics instance.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let blocks_scanned = IntCounter::with_opts(Opts::new(
            "mev_scan_blocks_scanned_total",
            "Total number of blocks analyzed",
        ))?;
        registry.register(Box::new(blocks_scanned.clone()))?;

        let blocks_failed = IntCounter::with_opts(Opts::new(
            "mev_scan_blocks_failed_total",
            "Total number of blocks that could not be fetched",
        ))?;
        registry.register(Box::new(blocks_failed.clone()))?;

        let transactions_classified = IntCounter::with_opts(Opts::new(
            "mev_scan_transactions_classified_total",
            "Total number of transactions classified",
        ))?;
        registry.register(Box::new(transactions_classified.clone()))?;

        let parse_errors = IntCounter::with_opts(Opts::new(
            "mev_scan_parse_errors_total",
            "Total number of transaction records rejected by validation",
        ))?;
        registry.register(Box::new(parse_errors.clone()))?;

        let flags = IntCounterVec::new(
            Opts::new("mev_scan_flags_total", "Total number of flags raised"),
            &["kind"],
        )?;
        registry.register(Box::new(flags.clone()))?;

        let fetch_retries = IntCounter::with_opts(Opts::new(
            "mev_scan_fetch_retries_total",
            "Total number of block fetch retries",
        ))?;
        registry.register(Box::new(fetch_retries.clone()))?;

        let rpc_errors = IntCounter::with_opts(Opts::new(
            "mev_scan_rpc_errors_total",
            "Total number of RPC errors",
        ))?;
        registry.register(Box::new(rpc_errors.clone()))?;

        let fetch_latency = HistogramVec::new(
            HistogramOpts::new("mev_scan_fetch_latency_seconds", "Feed call latency in seconds"),
            &["operation"],
        )?;
        registry.register(Box::new(fetch_latency.clone()))?;

        Ok(Self {
            registry,
            blocks_scanned,
            blocks_failed,
            transactions_classified,
            parse_errors,
            flags,
            fetch_retries,
            rpc_errors,
            fetch_latency,
        })
    }

    pub fn inc_blocks_scanned(&self) {
        self.blocks_scanned.inc();
    }

    pub fn inc_blocks_failed(&self) {
        self.blocks_failed.inc();
    }

    pub fn inc_transactions_classified(&self, count: u64) {
        self.transactions_classified.inc_by(count);
    }

    pub fn inc_parse_errors(&self, count: u64) {
        self.parse_errors.inc_by(count);
    }

    /// Increment the counter for one flag kind.
    pub fn inc_flag(&self, kind: FlagKind) {
        self.flags.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn inc_fetch_retries(&self) {
        self.fetch_retries.inc();
    }

    pub fn inc_rpc_errors(&self) {
        self.rpc_errors.inc();
    }

    /// Record feed call latency.
    pub fn observe_fetch_latency(&self, operation: &str, duration_secs: f64) {
        self.fetch_latency
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Get Prometheus metrics in the text exposition format.
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
