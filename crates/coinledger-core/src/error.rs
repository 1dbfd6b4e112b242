//! Error types for the coinledger pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The block source claims to be caught up but a block body is missing.
    /// Indicates corrupted upstream state; never retried.
    #[error("Block {hash} at height {height} missing from a caught-up source")]
    InconsistentSource { hash: String, height: u32 },

    #[error("Batch write failed after {attempts} attempts: {last}")]
    TooManyAttempts { attempts: u32, last: String },

    #[error("Indexing cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error must abort the current run immediately
    /// rather than being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InconsistentSource { .. } | Self::TooManyAttempts { .. } | Self::Cancelled
        )
    }
}
