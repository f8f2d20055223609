//! CLI for bounded MEV scans over recent Ethereum blocks.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use mev_scan_ingestion::{BlockFeed, MemoryFeed, RpcClient, ScanSession};
use mev_scan_telemetry::{audit, init_logging, Metrics};
use mev_scan_types::config::GasOrdering;
use mev_scan_types::{ScanConfig, ScanResult, ScanSnapshot};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mev-scan")]
#[command(about = "Scan recent Ethereum blocks for MEV-like transactions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the most recent blocks and report flagged transactions
    Scan {
        #[command(flatten)]
        overrides: ConfigArgs,

        /// Ethereum execution RPC URL
        #[arg(long, conflicts_with = "blocks_file")]
        rpc_url: Option<String>,

        /// JSON file with recorded block records, scanned instead of an RPC endpoint
        #[arg(long)]
        blocks_file: Option<String>,

        /// Fetch block receipts for real gas used instead of gas limits
        #[arg(long, default_value = "false")]
        with_receipts: bool,

        /// Write the full scan result as JSON
        #[arg(long)]
        output: Option<String>,

        /// Export flagged transactions as CSV
        #[arg(long)]
        csv: Option<String>,

        /// Serve /metrics and /snapshot on this address while scanning
        #[arg(long)]
        serve_address: Option<String>,

        /// Number of sandwich incidents to explain in the summary
        #[arg(long, default_value = "10")]
        explain: usize,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,

        /// Human-readable logs instead of JSON
        #[arg(long, default_value = "false")]
        plain_logs: bool,
    },
    /// Print the effective configuration as TOML
    ShowConfig {
        #[command(flatten)]
        overrides: ConfigArgs,
    },
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Number of blocks to scan (1-100)
    #[arg(long)]
    blocks: Option<u64>,

    /// Highest block to scan; defaults to the latest block
    #[arg(long)]
    start_block: Option<u64>,

    /// Gas price (gwei) above which a transaction is HighGas
    #[arg(long)]
    gas_threshold: Option<f64>,

    /// Derive the HighGas threshold per block as this multiple of the median
    #[arg(long)]
    median_multiplier: Option<f64>,

    /// Value (ether) below which a transaction can be Anomalous
    #[arg(long)]
    value_threshold: Option<f64>,

    /// Gas cost to value ratio above which a low-value transaction is Anomalous
    #[arg(long)]
    anomaly_ratio: Option<f64>,

    /// Wall-clock budget for the whole scan
    #[arg(long)]
    budget_seconds: Option<u64>,

    /// Gas ordering required between sandwich legs and victim
    #[arg(long, value_enum)]
    gas_ordering: Option<OrderingArg>,

    /// Maximum concurrent block fetches
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderingArg {
    Any,
    FrontNotBelowVictim,
    StrictBracket,
}

impl From<OrderingArg> for GasOrdering {
    fn from(arg: OrderingArg) -> Self {
        match arg {
            OrderingArg::Any => GasOrdering::Any,
            OrderingArg::FrontNotBelowVictim => GasOrdering::FrontNotBelowVictim,
            OrderingArg::StrictBracket => GasOrdering::StrictBracket,
        }
    }
}

impl ConfigArgs {
    /// Load the config file, if any, then apply command-line overrides.
    fn resolve(&self) -> anyhow::Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::load(path)?,
            None => ScanConfig::default(),
        };

        if let Some(blocks) = self.blocks {
            config.num_blocks_to_scan = blocks;
        }
        if self.start_block.is_some() {
            config.start_block = self.start_block;
        }
        if let Some(threshold) = self.gas_threshold {
            config.thresholds.gas_threshold = threshold;
        }
        if self.median_multiplier.is_some() {
            config.thresholds.median_multiplier = self.median_multiplier;
        }
        if let Some(threshold) = self.value_threshold {
            config.thresholds.value_threshold = threshold;
        }
        if let Some(ratio) = self.anomaly_ratio {
            config.thresholds.anomaly_ratio = ratio;
        }
        if let Some(budget) = self.budget_seconds {
            config.scan_time_budget_seconds = budget;
        }
        if let Some(ordering) = self.gas_ordering {
            config.sandwich.gas_ordering = ordering.into();
        }
        if let Some(concurrency) = self.concurrency {
            config.fetch.concurrency = concurrency;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            overrides,
            rpc_url,
            blocks_file,
            with_receipts,
            output,
            csv,
            serve_address,
            explain,
            log_level,
            plain_logs,
        } => {
            init_logging(log_level.as_deref(), !plain_logs)?;
            let config = overrides.resolve()?;
            let metrics = Metrics::new()?;

            let feed: Arc<dyn BlockFeed> = match (rpc_url, blocks_file) {
                (_, Some(path)) => Arc::new(MemoryFeed::from_json_file(&path)?),
                (Some(url), None) => {
                    Arc::new(RpcClient::new(&url, metrics.clone())?.with_receipts(with_receipts))
                }
                (None, None) => anyhow::bail!("either --rpc-url or --blocks-file is required"),
            };

            let result = run_scan(feed, config, metrics, serve_address.as_deref()).await?;

            print_summary(&result, explain);

            if let Some(path) = output {
                audit::write_result_json(&path, &result)?;
            }
            if let Some(path) = csv {
                audit::write_flagged_csv(&path, &result)?;
            }
        }
        Commands::ShowConfig { overrides } => {
            let config = overrides.resolve()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_scan(
    feed: Arc<dyn BlockFeed>,
    config: ScanConfig,
    metrics: Metrics,
    serve_address: Option<&str>,
) -> anyhow::Result<ScanResult> {
    let session = ScanSession::new(feed, config, metrics.clone())?;

    if let Some(addr) = serve_address {
        start_status_server(addr, metrics, session.subscribe()).await?;
    }

    let token = session.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping scan");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    Ok(session.run().await)
}

fn print_summary(result: &ScanResult, explain: usize) {
    println!("Scan status: {}", result.status.as_str());
    match result.block_range() {
        Some((first, last)) => println!(
            "Blocks: {} of {} requested ({}..={})",
            result.blocks_completed.len(),
            result.blocks_requested,
            first,
            last
        ),
        None => println!("Blocks: 0 of {} requested", result.blocks_requested),
    }
    if let Some(range) = &result.time_range {
        println!("Time range: {} .. {}", range.start.to_rfc3339(), range.end.to_rfc3339());
    }
    match result.gas_threshold_range() {
        Some((lo, hi)) if lo == hi => println!("HighGas threshold: {:.2} gwei", lo),
        Some((lo, hi)) => println!("HighGas threshold per block: {:.2} .. {:.2} gwei", lo, hi),
        None => {}
    }
    println!("Transactions classified: {}", result.transactions_seen);
    println!(
        "Flags: high_gas={} sandwich_front={} sandwich_back={} anomalous={}",
        result.counts.high_gas,
        result.counts.sandwich_front,
        result.counts.sandwich_back,
        result.counts.anomalous
    );
    println!(
        "Flagged transactions: {} in {} clusters, {} unclustered",
        result.flagged.len(),
        result.clusters.len(),
        result.unclustered.len()
    );

    for cluster in result.clusters.iter().take(explain) {
        println!(
            "  cluster {}: {} transactions, {} addresses, blocks {}..={}",
            cluster.id,
            cluster.member_count,
            cluster.addresses.len(),
            cluster.first_block,
            cluster.last_block
        );
    }

    if !result.sandwiches.is_empty() {
        println!("Sandwiches: {}", result.sandwiches.len());
    }
    for s in result.sandwiches.iter().take(explain) {
        println!(
            "  block {}: {} bracketed victim {} at position {} on {} (front {:.2} gwei, victim {:.2} gwei, back {:.2} gwei){}",
            s.block_number,
            s.attacker,
            s.victim,
            s.victim_position,
            s.target,
            s.front_gas_price,
            s.victim_gas_price,
            s.back_gas_price,
            if s.corroborated { ", legs also flagged" } else { "" }
        );
    }

    if !result.failures.is_empty() {
        println!("Failures: {}", result.failures.len());
    }
    println!("Elapsed: {} ms", result.elapsed_ms);
}

#[derive(Clone)]
struct StatusState {
    metrics: Metrics,
    snapshots: watch::Receiver<ScanSnapshot>,
}

async fn start_status_server(
    addr: &str,
    metrics: Metrics,
    snapshots: watch::Receiver<ScanSnapshot>,
) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
    use tower_http::cors::CorsLayer;

    async fn metrics_handler(
        State(state): State<StatusState>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match state.metrics.gather() {
            Ok(body) => Ok((StatusCode::OK, body)),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    async fn snapshot_handler(State(state): State<StatusState>) -> Json<ScanSnapshot> {
        Json(*state.snapshots.borrow())
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/snapshot", get(snapshot_handler))
        .layer(CorsLayer::permissive())
        .with_state(StatusState { metrics, snapshots });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status server listening on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Status server error: {}", e);
        }
    });

    Ok(())
}
