//! Partitioned, sorted table store.
//!
//! The production backend is an external collaborator; this module defines
//! the row shape, the per-batch limits, the outcome classification consumed
//! by the retry machinery, and an in-memory reference backend used by tests.
//!
//! Batch writes are idempotent upserts: each row fully replaces the row under
//! its `(partition_key, row_key)` pair, so replaying a window is safe.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coinledger_core::{IndexerError, RowRange};

// ─── TableRow ─────────────────────────────────────────────────────────────────

/// One row of a partitioned table: named byte columns under a two-part key.
///
/// Row keys within a partition sort byte-wise; the key schemes upstream are
/// designed so a plain ascending scan yields the intended order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub columns: BTreeMap<String, Vec<u8>>,
}

impl TableRow {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.columns.insert(name.into(), value);
        self
    }

    /// Approximate wire size: keys plus column names and payloads.
    pub fn byte_size(&self) -> usize {
        self.partition_key.len()
            + self.row_key.len()
            + self
                .columns
                .iter()
                .map(|(name, value)| name.len() + value.len())
                .sum::<usize>()
    }
}

// ─── TableLimits ──────────────────────────────────────────────────────────────

/// Bounds the store enforces per batch and per row.
#[derive(Debug, Clone, Copy)]
pub struct TableLimits {
    pub max_batch_rows: usize,
    pub max_batch_bytes: usize,
    pub max_row_bytes: usize,
}

impl Default for TableLimits {
    fn default() -> Self {
        Self {
            max_batch_rows: 100,
            max_batch_bytes: 4 * 1024 * 1024,
            max_row_bytes: 1024 * 1024,
        }
    }
}

// ─── BatchOutcome ─────────────────────────────────────────────────────────────

/// Result of a batch upsert, classified for the retry state machine.
///
/// Oversize conditions are outcomes rather than errors so the caller can
/// recover locally (split the batch, offload the row) without inspecting
/// error chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every row was upserted.
    Ok,
    /// The batch as a whole exceeds the count or byte bound.
    PayloadTooLarge,
    /// The row at this index exceeds the per-row bound.
    EntityTooLarge(usize),
    /// Retryable failure (timeout, throttling).
    Transient(String),
    /// Non-retryable failure.
    Fatal(String),
}

// ─── TableStore ───────────────────────────────────────────────────────────────

/// Partitioned sorted key-value store collaborator.
///
/// All rows of one `write_batch` call must share a partition key; the
/// batching layer upstream guarantees this.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn read(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableRow>, IndexerError>;

    /// Idempotent batch upsert. Oversize conditions come back as outcomes,
    /// never as `Err`.
    async fn write_batch(&self, table: &str, rows: Vec<TableRow>) -> BatchOutcome;

    /// Ascending byte-wise scan of one partition over a row-key range.
    async fn scan(
        &self,
        table: &str,
        partition_key: &str,
        range: &RowRange,
    ) -> Result<Vec<TableRow>, IndexerError>;

    async fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<(), IndexerError>;
}

// ─── MemoryTableStore ─────────────────────────────────────────────────────────

type Partitioned = BTreeMap<(String, String), TableRow>;

/// In-memory reference backend with limit enforcement and scripted fault
/// injection for exercising the retry paths.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Partitioned>>,
    limits: TableLimits,
    faults: Mutex<VecDeque<BatchOutcome>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: TableLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Queue an outcome to be returned by the next `write_batch` call
    /// instead of applying it. Faults are consumed in FIFO order.
    pub fn inject_fault(&self, outcome: BatchOutcome) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(outcome);
        }
    }

    /// Total row count across a table, for assertions.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.get(table).map(BTreeMap::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn check_limits(&self, rows: &[TableRow]) -> Option<BatchOutcome> {
        for (index, row) in rows.iter().enumerate() {
            if row.byte_size() > self.limits.max_row_bytes {
                return Some(BatchOutcome::EntityTooLarge(index));
            }
        }
        let total: usize = rows.iter().map(TableRow::byte_size).sum();
        if rows.len() > self.limits.max_batch_rows || total > self.limits.max_batch_bytes {
            return Some(BatchOutcome::PayloadTooLarge);
        }
        None
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn read(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableRow>, IndexerError> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| IndexerError::Storage("table store lock poisoned".into()))?;
        Ok(tables
            .get(table)
            .and_then(|t| t.get(&(partition_key.to_owned(), row_key.to_owned())))
            .cloned())
    }

    async fn write_batch(&self, table: &str, rows: Vec<TableRow>) -> BatchOutcome {
        if let Ok(mut faults) = self.faults.lock() {
            if let Some(outcome) = faults.pop_front() {
                return outcome;
            }
        }
        if let Some(outcome) = self.check_limits(&rows) {
            return outcome;
        }
        let mut tables = match self.tables.lock() {
            Ok(tables) => tables,
            Err(_) => return BatchOutcome::Fatal("table store lock poisoned".into()),
        };
        let entries = tables.entry(table.to_owned()).or_default();
        for row in rows {
            entries.insert((row.partition_key.clone(), row.row_key.clone()), row);
        }
        BatchOutcome::Ok
    }

    async fn scan(
        &self,
        table: &str,
        partition_key: &str,
        range: &RowRange,
    ) -> Result<Vec<TableRow>, IndexerError> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| IndexerError::Storage("table store lock poisoned".into()))?;
        let Some(entries) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .range((partition_key.to_owned(), String::new())..)
            .take_while(|((partition, _), _)| partition == partition_key)
            .filter(|((_, row_key), _)| range.contains(row_key))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<(), IndexerError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| IndexerError::Storage("table store lock poisoned".into()))?;
        if let Some(entries) = tables.get_mut(table) {
            entries.remove(&(partition_key.to_owned(), row_key.to_owned()));
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
