//! Content-addressable blob store, used only as the overflow path for table
//! rows that exceed the per-row size bound.
//!
//! An offloaded row keeps its keys and carries a single pointer column naming
//! the blob that holds its real columns.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};

use coinledger_core::IndexerError;

use crate::table::TableRow;

/// Column under which an offloaded row stores its blob address.
pub const BLOB_POINTER_COLUMN: &str = "blobref";

// ─── BlobStore ────────────────────────────────────────────────────────────────

/// Content-addressed object store collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` and return their content address.
    async fn put(&self, bytes: &[u8]) -> Result<String, IndexerError>;

    async fn get(&self, address: &str) -> Result<Option<Vec<u8>>, IndexerError>;
}

/// In-memory reference backend, addressed by sha256 of the content.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<String, IndexerError> {
        let address = sha256::Hash::hash(bytes).to_string();
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| IndexerError::Storage("blob store lock poisoned".into()))?;
        blobs.insert(address.clone(), bytes.to_vec());
        Ok(address)
    }

    async fn get(&self, address: &str) -> Result<Option<Vec<u8>>, IndexerError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| IndexerError::Storage("blob store lock poisoned".into()))?;
        Ok(blobs.get(address).cloned())
    }
}

// ─── Row offload ──────────────────────────────────────────────────────────────

/// True if `row` is a pointer left behind by a previous offload.
pub fn is_offloaded(row: &TableRow) -> bool {
    row.columns.contains_key(BLOB_POINTER_COLUMN)
}

/// Move a row's columns into blob storage, leaving a small pointer row under
/// the same keys.
pub async fn offload_row(blob: &dyn BlobStore, row: &TableRow) -> Result<TableRow, IndexerError> {
    let payload = serde_json::to_vec(&row.columns)
        .map_err(|e| IndexerError::Storage(format!("column serialization failed: {e}")))?;
    let address = blob.put(&payload).await?;
    tracing::debug!(
        partition = %row.partition_key,
        row = %row.row_key,
        bytes = payload.len(),
        %address,
        "Offloaded oversized row to blob storage"
    );
    Ok(TableRow::new(row.partition_key.clone(), row.row_key.clone())
        .with_column(BLOB_POINTER_COLUMN, address.into_bytes()))
}

/// Resolve an offloaded row back to its full columns. Plain rows pass
/// through unchanged.
pub async fn restore_row(blob: &dyn BlobStore, row: &TableRow) -> Result<TableRow, IndexerError> {
    let Some(pointer) = row.columns.get(BLOB_POINTER_COLUMN) else {
        return Ok(row.clone());
    };
    let address = std::str::from_utf8(pointer)
        .map_err(|_| IndexerError::Storage("blob pointer is not valid utf-8".into()))?;
    let payload = blob
        .get(address)
        .await?
        .ok_or_else(|| IndexerError::Storage(format!("dangling blob pointer {address}")))?;
    let columns = serde_json::from_slice(&payload)
        .map_err(|e| IndexerError::Storage(format!("blob payload decode failed: {e}")))?;
    Ok(TableRow {
        partition_key: row.partition_key.clone(),
        row_key: row.row_key.clone(),
        columns,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_content_addressed() {
        let store = MemoryBlobStore::new();
        let a = store.put(b"payload").await.unwrap();
        let b = store.put(b"payload").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get(&a).await.unwrap().unwrap(), b"payload");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offload_and_restore_round_trip() {
        let store = MemoryBlobStore::new();
        let row = TableRow::new("p", "k")
            .with_column("d00", vec![1u8; 128])
            .with_column("d01", vec![2u8; 64]);

        let pointer = offload_row(&store, &row).await.unwrap();
        assert!(is_offloaded(&pointer));
        assert_eq!(pointer.partition_key, row.partition_key);
        assert_eq!(pointer.row_key, row.row_key);
        assert!(pointer.byte_size() < row.byte_size());

        let restored = restore_row(&store, &pointer).await.unwrap();
        assert_eq!(restored, row);

        // Plain rows pass through restore untouched.
        let plain = restore_row(&store, &row).await.unwrap();
        assert_eq!(plain, row);
    }
}
