//! coinledger-core — foundation for the checkpointed, fork-aware indexing engine.
//!
//! # Architecture
//!
//! ```text
//! IndexingPipeline (coinledger-engine)
//!      ├── BlockFetcher      (fork point, gap-free body streaming)
//!      │      ├── HeaderChain   (header index, locators, fork finding)
//!      │      └── BlockSource   (block repository collaborator)
//!      └── CheckpointManager (per-kind resume pointers)
//! ```

pub mod chain;
pub mod checkpoint;
pub mod error;
pub mod fetcher;
pub mod types;

pub use chain::{BlockSource, HeaderChain, HeaderEntry, MemoryBlockSource};
pub use checkpoint::{
    BlockLocator, Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore,
};
pub use error::IndexerError;
pub use fetcher::BlockFetcher;
pub use types::{BlockInfo, Cancellation, IndexKind, IndexerConfig, RowRange};
