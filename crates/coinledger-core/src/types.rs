//! Shared types for the indexing pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Block, BlockHash};
use serde::{Deserialize, Serialize};

// ─── IndexKind ────────────────────────────────────────────────────────────────

/// The four indexes the engine maintains. Each advances its own checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Blocks,
    Transactions,
    Balances,
    Wallets,
}

impl IndexKind {
    /// All index kinds, in no particular order.
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Blocks,
        IndexKind::Transactions,
        IndexKind::Balances,
        IndexKind::Wallets,
    ];

    /// Stable identifier used for checkpoint keys and table names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Transactions => "transactions",
            Self::Balances => "balances",
            Self::Wallets => "wallets",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── BlockInfo ────────────────────────────────────────────────────────────────

/// A block paired with its position in the chain, as yielded by the fetcher.
///
/// Ephemeral: produced by the fetcher, consumed immediately by the extraction
/// tasks, never persisted as-is.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub height: u32,
    pub hash: BlockHash,
    pub block: Block,
}

// ─── IndexerConfig ────────────────────────────────────────────────────────────

/// Configuration surface consumed by the pipeline. Owned by the (excluded)
/// startup wiring; every knob here maps to one behavior of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Storage namespace prefix applied to every table name.
    pub namespace: String,
    /// First height to index.
    pub from_height: u32,
    /// Optional end height (inclusive). `None` = follow the chain forever.
    pub to_height: Option<u32>,
    /// Maximum rows per bulk batch.
    pub batch_size: usize,
    /// Maximum bytes per bulk batch.
    pub batch_bytes: usize,
    /// Number of concurrent batch-write workers.
    pub worker_count: usize,
    /// Upper bound on queued batches before `submit` blocks.
    pub queue_capacity: usize,
    /// How often to commit a checkpoint mid-run.
    pub checkpoint_interval_secs: u64,
    /// Forces a full rescan from `from_height`, discarding saved checkpoints.
    pub ignore_checkpoints: bool,
    /// Poll interval once the stream is caught up with the source.
    pub poll_interval_ms: u64,
    /// Per storage operation execution bound; an elapsed timeout counts as a
    /// transient failure.
    pub op_timeout_ms: u64,
    /// Bounded attempt count for transient storage failures.
    pub max_attempts: u32,
}

impl IndexerConfig {
    /// Table name for an index kind, with the namespace prefix applied.
    pub fn table_name(&self, kind: IndexKind) -> String {
        format!("{}{}", self.namespace, kind.as_str())
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            from_height: 0,
            to_height: None,
            batch_size: 100,
            batch_bytes: 4 * 1024 * 1024,
            worker_count: 15,
            queue_capacity: 64,
            checkpoint_interval_secs: 60,
            ignore_checkpoints: false,
            poll_interval_ms: 2000,
            op_timeout_ms: 10_000,
            max_attempts: 10,
        }
    }
}

// ─── RowRange ─────────────────────────────────────────────────────────────────

/// A two-sided row-key range inside one partition, compared byte-wise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub start: String,
    pub end: String,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
}

impl RowRange {
    pub fn contains(&self, key: &str) -> bool {
        let after_start = if self.start_inclusive {
            key >= self.start.as_str()
        } else {
            key > self.start.as_str()
        };
        let before_end = if self.end_inclusive {
            key <= self.end.as_str()
        } else {
            key < self.end.as_str()
        };
        after_start && before_end
    }
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation signal.
///
/// Observed at block-fetch boundaries and before starting new batches;
/// in-flight writes are allowed to complete so a window is never half-aborted.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
