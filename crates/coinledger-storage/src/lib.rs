//! coinledger-storage — partitioned table and blob storage with batched,
//! retrying bulk writes.
//!
//! # Architecture
//!
//! ```text
//! RetryingExecutor  (bounded worker pool, backoff / split / offload)
//!      ├── BulkBatcher   (per-partition bounded batches)
//!      ├── TableStore    (partitioned sorted store collaborator)
//!      └── BlobStore     (content-addressed overflow path)
//! entity            (payload ↔ numbered chunk columns codec)
//! ```

pub mod batch;
pub mod blob;
pub mod entity;
pub mod executor;
pub mod table;

pub use batch::{Batch, BulkBatcher};
pub use blob::{
    is_offloaded, offload_row, restore_row, BlobStore, MemoryBlobStore, BLOB_POINTER_COLUMN,
};
pub use entity::{decode_chunks, encode_chunks, CHUNK_BYTES};
pub use executor::{RetryPolicy, RetryingExecutor};
pub use table::{BatchOutcome, MemoryTableStore, TableLimits, TableRow, TableStore};
