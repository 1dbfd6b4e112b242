//! Checkpoints — persisted resume points for crash recovery.
//!
//! A checkpoint stores a block locator (ordered hash list, most-recent
//! ancestor candidates first) for one index kind. On restart, the pipeline
//! resolves the locator against the current header chain to find the fork
//! point and resumes strictly after it, so a reorganized chain segment is
//! re-indexed rather than trusted.

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::IndexKind;

// ─── BlockLocator ─────────────────────────────────────────────────────────────

/// An ordered list of block hashes, most recent first, with dense spacing
/// near the tip and exponentially growing gaps further back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocator {
    pub hashes: Vec<BlockHash>,
}

impl BlockLocator {
    pub fn new(hashes: Vec<BlockHash>) -> Self {
        Self { hashes }
    }

    /// The most recent hash in the locator, if any.
    pub fn tip(&self) -> Option<BlockHash> {
        self.hashes.first().copied()
    }

    /// Persisted wire form: the 32-byte hashes concatenated in order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.hashes.len() * 32);
        for hash in &self.hashes {
            out.extend_from_slice(hash.as_byte_array());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexerError> {
        if bytes.len() % 32 != 0 {
            return Err(IndexerError::Checkpoint(format!(
                "locator length {} is not a multiple of 32",
                bytes.len()
            )));
        }
        let hashes = bytes
            .chunks_exact(32)
            .map(|chunk| {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(chunk);
                BlockHash::from_byte_array(raw)
            })
            .collect();
        Ok(Self { hashes })
    }
}

// ─── Checkpoint ───────────────────────────────────────────────────────────────

/// A persisted checkpoint for one index kind.
///
/// Mutated only by the pipeline after a batch window is durably written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub kind: IndexKind,
    pub locator: BlockLocator,
    /// Genesis hash of the chain the locator belongs to; a mismatch at load
    /// time means the checkpoint is for a different network.
    pub genesis: BlockHash,
    /// Unix timestamp of when this checkpoint was saved.
    pub saved_at: i64,
}

impl Checkpoint {
    /// A fresh checkpoint pointing at genesis only (full scan).
    pub fn genesis(kind: IndexKind, genesis: BlockHash) -> Self {
        Self {
            kind,
            locator: BlockLocator::new(vec![genesis]),
            genesis,
            saved_at: 0,
        }
    }
}

// ─── CheckpointStore ──────────────────────────────────────────────────────────

/// Trait for storing and loading checkpoints, keyed by namespace + kind.
///
/// Implementations include `MemoryCheckpointStore`; production deployments
/// back this with the same table service the indexes are written to.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(
        &self,
        namespace: &str,
        kind: IndexKind,
    ) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, namespace: &str, checkpoint: Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when forcing a full rescan).
    async fn delete(&self, namespace: &str, kind: IndexKind) -> Result<(), IndexerError>;
}

// ─── CheckpointManager ────────────────────────────────────────────────────────

/// Manages checkpoint reads/writes for one index kind.
pub struct CheckpointManager {
    store: std::sync::Arc<dyn CheckpointStore>,
    namespace: String,
    kind: IndexKind,
}

impl CheckpointManager {
    pub fn new(
        store: std::sync::Arc<dyn CheckpointStore>,
        namespace: impl Into<String>,
        kind: IndexKind,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            kind,
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Load the saved checkpoint, or a genesis checkpoint if none exists or
    /// the saved one belongs to a different network.
    pub async fn load_or_genesis(&self, genesis: BlockHash) -> Result<Checkpoint, IndexerError> {
        match self.store.load(&self.namespace, self.kind).await? {
            Some(cp) if cp.genesis == genesis => Ok(cp),
            Some(cp) => {
                tracing::warn!(
                    kind = %self.kind,
                    saved = %cp.genesis,
                    expected = %genesis,
                    "Checkpoint belongs to a different network, starting over"
                );
                Ok(Checkpoint::genesis(self.kind, genesis))
            }
            None => Ok(Checkpoint::genesis(self.kind, genesis)),
        }
    }

    /// Persist a new resume point. Only called once the writes for the
    /// current window have fully drained.
    pub async fn commit(
        &self,
        locator: BlockLocator,
        genesis: BlockHash,
    ) -> Result<(), IndexerError> {
        let cp = Checkpoint {
            kind: self.kind,
            locator,
            genesis,
            saved_at: chrono::Utc::now().timestamp(),
        };
        tracing::debug!(kind = %self.kind, tip = ?cp.locator.tip(), "Committing checkpoint");
        self.store.save(&self.namespace, cp).await
    }

    pub async fn reset(&self) -> Result<(), IndexerError> {
        self.store.delete(&self.namespace, self.kind).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, kind: IndexKind) -> String {
        format!("{namespace}/{kind}")
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(
        &self,
        namespace: &str,
        kind: IndexKind,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self
            .data
            .lock()
            .map_err(|_| IndexerError::Checkpoint("checkpoint store lock poisoned".into()))?
            .get(&Self::key(namespace, kind))
            .cloned())
    }

    async fn save(&self, namespace: &str, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        let key = Self::key(namespace, checkpoint.kind);
        self.data
            .lock()
            .map_err(|_| IndexerError::Checkpoint("checkpoint store lock poisoned".into()))?
            .insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, namespace: &str, kind: IndexKind) -> Result<(), IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Checkpoint("checkpoint store lock poisoned".into()))?
            .remove(&Self::key(namespace, kind));
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> BlockHash {
        BlockHash::from_byte_array([n; 32])
    }

    #[test]
    fn locator_byte_roundtrip() {
        let locator = BlockLocator::new(vec![hash(3), hash(2), hash(1)]);
        let bytes = locator.to_bytes();
        assert_eq!(bytes.len(), 96);
        let back = BlockLocator::from_bytes(&bytes).unwrap();
        assert_eq!(back, locator);
        assert_eq!(back.tip(), Some(hash(3)));
    }

    #[test]
    fn locator_rejects_truncated_bytes() {
        assert!(BlockLocator::from_bytes(&[0u8; 33]).is_err());
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = std::sync::Arc::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store, "test", IndexKind::Balances);

        // No checkpoint initially: genesis fallback
        let cp = mgr.load_or_genesis(hash(0)).await.unwrap();
        assert_eq!(cp.locator.tip(), Some(hash(0)));

        mgr.commit(BlockLocator::new(vec![hash(9), hash(0)]), hash(0))
            .await
            .unwrap();

        let cp = mgr.load_or_genesis(hash(0)).await.unwrap();
        assert_eq!(cp.locator.tip(), Some(hash(9)));
    }

    #[tokio::test]
    async fn network_mismatch_starts_over() {
        let store = std::sync::Arc::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store, "test", IndexKind::Blocks);
        mgr.commit(BlockLocator::new(vec![hash(9)]), hash(0))
            .await
            .unwrap();

        // Same kind, different genesis: saved locator must be ignored.
        let cp = mgr.load_or_genesis(hash(7)).await.unwrap();
        assert_eq!(cp.locator.tip(), Some(hash(7)));
    }

    #[tokio::test]
    async fn checkpoints_are_independent_per_kind() {
        let store = std::sync::Arc::new(MemoryCheckpointStore::new());
        let balances = CheckpointManager::new(store.clone(), "t", IndexKind::Balances);
        let wallets = CheckpointManager::new(store, "t", IndexKind::Wallets);

        balances
            .commit(BlockLocator::new(vec![hash(5)]), hash(0))
            .await
            .unwrap();

        let cp = wallets.load_or_genesis(hash(0)).await.unwrap();
        assert_eq!(cp.locator.tip(), Some(hash(0)));
    }
}
