//! Read helpers over the indexed tables.
//!
//! The serving layer proper is out of scope; these cover what the engine
//! itself needs: balance history scans and parent-transaction resolution for
//! deferred spend lookup.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::consensus::encode::deserialize;
use bitcoin::{Transaction, Txid};

use coinledger_balances::{
    BalanceId, BalanceQuery, OrderedBalanceChange, TransactionLookup,
};
use coinledger_core::IndexerError;
use coinledger_storage::{decode_chunks, restore_row, BlobStore, TableStore};

use crate::task::{hash_partition, BALANCE_COLUMN};

// ─── BalanceReader ────────────────────────────────────────────────────────────

/// Scans a subject's balance history, following blob pointers for offloaded
/// rows. Rows come back in key order, which the key scheme makes newest-first
/// with unconfirmed entries leading.
pub struct BalanceReader {
    store: Arc<dyn TableStore>,
    blob: Arc<dyn BlobStore>,
    table: String,
}

impl BalanceReader {
    pub fn new(
        store: Arc<dyn TableStore>,
        blob: Arc<dyn BlobStore>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blob,
            table: table.into(),
        }
    }

    pub async fn history(
        &self,
        id: &BalanceId,
        query: &BalanceQuery,
    ) -> Result<Vec<OrderedBalanceChange>, IndexerError> {
        let (partition, range) = query.range(id);
        let rows = self.store.scan(&self.table, &partition, &range).await?;
        let mut history = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = restore_row(self.blob.as_ref(), row).await?;
            let record = row.columns.get(BALANCE_COLUMN).ok_or_else(|| {
                IndexerError::Storage(format!("row {} has no balance record", row.row_key))
            })?;
            let change = serde_json::from_slice(record).map_err(|e| {
                IndexerError::Storage(format!("balance record decode failed: {e}"))
            })?;
            history.push(change);
        }
        Ok(history)
    }
}

// ─── TableTransactionLookup ───────────────────────────────────────────────────

/// Resolves parent transactions from the transactions table, following blob
/// pointers for offloaded rows.
pub struct TableTransactionLookup {
    store: Arc<dyn TableStore>,
    blob: Arc<dyn BlobStore>,
    table: String,
}

impl TableTransactionLookup {
    pub fn new(
        store: Arc<dyn TableStore>,
        blob: Arc<dyn BlobStore>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blob,
            table: table.into(),
        }
    }
}

#[async_trait]
impl TransactionLookup for TableTransactionLookup {
    async fn get(&self, txid: &Txid) -> Result<Option<Transaction>, IndexerError> {
        let key = txid.to_string();
        let Some(row) = self
            .store
            .read(&self.table, &hash_partition(&key), &key)
            .await?
        else {
            return Ok(None);
        };
        let row = restore_row(self.blob.as_ref(), &row).await?;
        let raw = decode_chunks(&row.columns)?;
        let tx = deserialize(&raw)
            .map_err(|e| IndexerError::Storage(format!("transaction {key} decode failed: {e}")))?;
        Ok(Some(tx))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
