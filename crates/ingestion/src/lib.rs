//! Block retrieval and scan orchestration.

pub mod block_processor;
pub mod feed;
pub mod rpc_client;
pub mod scan;

pub use block_processor::{BlockOutcome, BlockProcessor};
pub use feed::{BlockFeed, MemoryFeed};
pub use rpc_client::RpcClient;
pub use scan::ScanSession;
