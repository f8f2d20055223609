//! Block feed interface and an in-memory implementation.
//!
//! A feed is the only way blocks enter a scan. The RPC client is the
//! production feed; [`MemoryFeed`] replays recorded blocks and can inject
//! failures and latency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use mev_scan_types::{BlockRecord, FeedError};
use tokio::sync::Mutex;
use tracing::debug;

/// Source of raw block records.
#[async_trait]
pub trait BlockFeed: Send + Sync {
    /// Number of the most recent block the feed can serve.
    async fn latest_block_number(&self) -> Result<u64, FeedError>;

    /// Fetch one block with all of its transactions.
    ///
    /// # Arguments
    /// * `block_number` - The block to fetch
    ///
    /// # Returns
    /// The unvalidated block record, or an error the caller may retry
    async fn fetch_block(&self, block_number: u64) -> Result<BlockRecord, FeedError>;
}

/// Feed backed by records held in memory.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    blocks: BTreeMap<u64, BlockRecord>,
    head_available: bool,
    /// Remaining transient failures per block.
    transient: Mutex<HashMap<u64, usize>>,
    unavailable: HashSet<u64>,
    delays: HashMap<u64, Duration>,
    calls: Mutex<HashMap<u64, usize>>,
}

impl MemoryFeed {
    pub fn new(blocks: impl IntoIterator<Item = BlockRecord>) -> Self {
        Self {
            blocks: blocks.into_iter().map(|b| (b.number, b)).collect(),
            head_available: true,
            ..Self::default()
        }
    }

    /// Load a JSON array of block records.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, FeedError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FeedError::Transport(format!("{}: {}", path.as_ref().display(), e)))?;
        let blocks: Vec<BlockRecord> =
            serde_json::from_str(&content).map_err(|e| FeedError::Malformed(e.to_string()))?;
        debug!(blocks = blocks.len(), "Loaded recorded blocks");
        Ok(Self::new(blocks))
    }

    /// Make the head lookup fail.
    pub fn without_head(mut self) -> Self {
        self.head_available = false;
        self
    }

    /// Fail the next `times` fetches of `block_number` with a transport error.
    pub fn fail_times(mut self, block_number: u64, times: usize) -> Self {
        self.transient.get_mut().insert(block_number, times);
        self
    }

    /// Fail every fetch of `block_number`.
    pub fn fail_always(mut self, block_number: u64) -> Self {
        self.unavailable.insert(block_number);
        self
    }

    /// Delay every fetch of `block_number`.
    pub fn with_delay(mut self, block_number: u64, delay: Duration) -> Self {
        self.delays.insert(block_number, delay);
        self
    }

    /// How many times `block_number` has been requested.
    pub async fn fetch_calls(&self, block_number: u64) -> usize {
        self.calls
            .lock()
            .await
            .get(&block_number)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlockFeed for MemoryFeed {
    async fn latest_block_number(&self) -> Result<u64, FeedError> {
        if !self.head_available {
            return Err(FeedError::Transport("head unavailable".to_string()));
        }
        self.blocks
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| FeedError::Malformed("feed holds no blocks".to_string()))
    }

    async fn fetch_block(&self, block_number: u64) -> Result<BlockRecord, FeedError> {
        *self.calls.lock().await.entry(block_number).or_insert(0) += 1;

        if let Some(delay) = self.delays.get(&block_number) {
            tokio::time::sleep(*delay).await;
        }

        if self.unavailable.contains(&block_number) {
            return Err(FeedError::Transport(format!("block {block_number} unreachable")));
        }

        if let Some(remaining) = self.transient.lock().await.get_mut(&block_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FeedError::Transport("connection reset".to_string()));
            }
        }

        self.blocks
            .get(&block_number)
            .cloned()
            .ok_or(FeedError::NotFound(block_number))
    }
}
