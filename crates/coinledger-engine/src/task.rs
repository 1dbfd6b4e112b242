//! Per-kind index tasks: how one block becomes table rows.
//!
//! Each task is a pure block-to-rows function; the pipeline owns streaming,
//! batching, and checkpointing. Raw payloads are consensus-encoded and stored
//! under chunked columns; balance records are JSON under the sortable balance
//! key scheme.

use std::sync::Arc;

use bitcoin::consensus::encode::serialize;

use coinledger_balances::{
    extract_script_changes, extract_wallet_changes, OrderedBalanceChange, WalletRuleSet,
};
use coinledger_core::{BlockInfo, IndexKind, IndexerError};
use coinledger_storage::{encode_chunks, TableRow};

/// Column carrying a serialized balance record.
pub const BALANCE_COLUMN: &str = "json";
/// Back-reference column from a transaction row to its block.
pub const BLOCK_REF_COLUMN: &str = "block";
/// Height column on block and transaction rows.
pub const HEIGHT_COLUMN: &str = "height";

/// Two-hex-character shard of a hash-shaped key, used to partition the block
/// and transaction tables.
pub fn hash_partition(key: &str) -> String {
    key.chars().take(2).collect()
}

// ─── IndexTask ────────────────────────────────────────────────────────────────

/// Turns one block into the rows of one index kind.
pub trait IndexTask: Send + Sync {
    fn kind(&self) -> IndexKind;

    fn rows(&self, info: &BlockInfo) -> Result<Vec<TableRow>, IndexerError>;

    /// True when the task can produce no rows at all; the pipeline then
    /// fast-forwards the checkpoint without reading block bodies.
    fn is_noop(&self) -> bool {
        false
    }
}

// ─── BlockIndexTask ───────────────────────────────────────────────────────────

/// Raw blocks, keyed by hash, chunk-encoded.
#[derive(Default)]
pub struct BlockIndexTask;

impl IndexTask for BlockIndexTask {
    fn kind(&self) -> IndexKind {
        IndexKind::Blocks
    }

    fn rows(&self, info: &BlockInfo) -> Result<Vec<TableRow>, IndexerError> {
        let key = info.hash.to_string();
        let mut row = TableRow::new(hash_partition(&key), key);
        row.columns = encode_chunks(&serialize(&info.block));
        row.columns
            .insert(HEIGHT_COLUMN.into(), info.height.to_string().into_bytes());
        Ok(vec![row])
    }
}

// ─── TransactionIndexTask ─────────────────────────────────────────────────────

/// Raw transactions keyed by txid, each carrying a back-reference to the
/// block and height it confirmed in.
#[derive(Default)]
pub struct TransactionIndexTask;

impl IndexTask for TransactionIndexTask {
    fn kind(&self) -> IndexKind {
        IndexKind::Transactions
    }

    fn rows(&self, info: &BlockInfo) -> Result<Vec<TableRow>, IndexerError> {
        let mut rows = Vec::with_capacity(info.block.txdata.len());
        for tx in &info.block.txdata {
            let key = tx.compute_txid().to_string();
            let mut row = TableRow::new(hash_partition(&key), key);
            row.columns = encode_chunks(&serialize(tx));
            row.columns
                .insert(BLOCK_REF_COLUMN.into(), info.hash.to_string().into_bytes());
            row.columns
                .insert(HEIGHT_COLUMN.into(), info.height.to_string().into_bytes());
            rows.push(row);
        }
        Ok(rows)
    }
}

// ─── Balance tasks ────────────────────────────────────────────────────────────

fn balance_row(change: &OrderedBalanceChange) -> Result<TableRow, IndexerError> {
    let record = serde_json::to_vec(change)
        .map_err(|e| IndexerError::Storage(format!("balance record encode failed: {e}")))?;
    let row_key = format!(
        "{}:{}",
        change.balance_id.token(),
        change.locator().query_form()
    );
    Ok(TableRow::new(change.balance_id.partition_key(), row_key)
        .with_column(BALANCE_COLUMN, record))
}

/// Script-level balance history.
#[derive(Default)]
pub struct BalanceIndexTask;

impl IndexTask for BalanceIndexTask {
    fn kind(&self) -> IndexKind {
        IndexKind::Balances
    }

    fn rows(&self, info: &BlockInfo) -> Result<Vec<TableRow>, IndexerError> {
        let seen = info.block.header.time as i64;
        let mut rows = Vec::new();
        for tx in &info.block.txdata {
            let txid = tx.compute_txid();
            for change in
                extract_script_changes(txid, tx, Some((info.height, info.hash)), seen)
            {
                rows.push(balance_row(&change)?);
            }
        }
        Ok(rows)
    }
}

/// Wallet-level balance history, folded through the rule set. With no rules
/// registered the task is a no-op and the pipeline only moves the checkpoint.
pub struct WalletIndexTask {
    rules: Arc<WalletRuleSet>,
}

impl WalletIndexTask {
    pub fn new(rules: Arc<WalletRuleSet>) -> Self {
        Self { rules }
    }
}

impl IndexTask for WalletIndexTask {
    fn kind(&self) -> IndexKind {
        IndexKind::Wallets
    }

    fn rows(&self, info: &BlockInfo) -> Result<Vec<TableRow>, IndexerError> {
        let seen = info.block.header.time as i64;
        let mut rows = Vec::new();
        for tx in &info.block.txdata {
            let txid = tx.compute_txid();
            for change in extract_wallet_changes(
                txid,
                tx,
                Some((info.height, info.hash)),
                seen,
                &self.rules,
            ) {
                rows.push(balance_row(&change)?);
            }
        }
        Ok(rows)
    }

    fn is_noop(&self) -> bool {
        self.rules.is_empty()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
