//! coinledger-engine — the indexing pipeline tying the pieces together.
//!
//! # Architecture
//!
//! ```text
//! Indexer (builder-assembled)
//!   └── IndexingPipeline   (one checkpointed driver per index kind)
//!         ├── IndexTask    (Blocks | Transactions | Balances | Wallets)
//!         ├── BlockFetcher (coinledger-core)
//!         └── BulkBatcher → RetryingExecutor (coinledger-storage)
//! queries (balance history scans, parent-tx resolution)
//! ```

pub mod builder;
pub mod pipeline;
pub mod queries;
pub mod task;

pub use builder::{Indexer, IndexerBuilder};
pub use pipeline::{IndexedHeights, IndexingPipeline};
pub use queries::{BalanceReader, TableTransactionLookup};
pub use task::{
    BalanceIndexTask, BlockIndexTask, IndexTask, TransactionIndexTask, WalletIndexTask,
};
