//! Header chain view and block source collaborators.
//!
//! `HeaderChain` is the engine's picture of the current best chain: headers
//! only, indexed by height and by hash, with locator construction and fork
//! finding. Bodies live behind the `BlockSource` trait and may lag behind the
//! header chain.

use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::{Block, BlockHash};

use crate::checkpoint::BlockLocator;
use crate::error::IndexerError;
use crate::types::Cancellation;

// ─── HeaderChain ──────────────────────────────────────────────────────────────

/// A header with its position on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderEntry {
    pub height: u32,
    pub hash: BlockHash,
    pub header: Header,
}

/// In-memory index over the best header chain, genesis at height 0.
///
/// Cloneable: the fetcher works against a snapshot for one window, so a chain
/// update mid-window is observed at the next window boundary.
#[derive(Debug, Clone)]
pub struct HeaderChain {
    by_height: Vec<HeaderEntry>,
    by_hash: HashMap<BlockHash, u32>,
}

impl HeaderChain {
    pub fn new(genesis: Header) -> Self {
        let hash = genesis.block_hash();
        let entry = HeaderEntry {
            height: 0,
            hash,
            header: genesis,
        };
        let mut by_hash = HashMap::new();
        by_hash.insert(hash, 0);
        Self {
            by_height: vec![entry],
            by_hash,
        }
    }

    /// Append a header extending the current tip.
    pub fn push(&mut self, header: Header) -> Result<HeaderEntry, IndexerError> {
        let tip = self.tip();
        if header.prev_blockhash != tip.hash {
            return Err(IndexerError::Chain(format!(
                "header {} does not extend tip {} at height {}",
                header.block_hash(),
                tip.hash,
                tip.height
            )));
        }
        let entry = HeaderEntry {
            height: tip.height + 1,
            hash: header.block_hash(),
            header,
        };
        self.by_hash.insert(entry.hash, entry.height);
        self.by_height.push(entry);
        Ok(entry)
    }

    /// Truncate the chain back to `height` (reorg: a competing branch won).
    pub fn rewind_to(&mut self, height: u32) {
        while self.tip().height > height {
            let dropped = self.by_height.pop().map(|e| e.hash);
            if let Some(hash) = dropped {
                self.by_hash.remove(&hash);
            }
        }
    }

    pub fn tip(&self) -> HeaderEntry {
        *self
            .by_height
            .last()
            .unwrap_or_else(|| unreachable!("chain always holds genesis"))
    }

    pub fn height(&self) -> u32 {
        self.tip().height
    }

    pub fn genesis(&self) -> HeaderEntry {
        self.by_height[0]
    }

    pub fn at(&self, height: u32) -> Option<HeaderEntry> {
        self.by_height.get(height as usize).copied()
    }

    pub fn get(&self, hash: &BlockHash) -> Option<HeaderEntry> {
        self.by_hash.get(hash).and_then(|h| self.at(*h))
    }

    /// Latest block common to `locator` and this chain. Falls back to genesis
    /// when no locator hash is on the chain (deep reorg or foreign locator).
    pub fn find_fork(&self, locator: &BlockLocator) -> HeaderEntry {
        for hash in &locator.hashes {
            if let Some(entry) = self.get(hash) {
                return entry;
            }
        }
        self.genesis()
    }

    /// Build a locator anchored at `height`: the last 10 hashes densely, then
    /// exponentially growing gaps, always ending at genesis.
    pub fn locator_at(&self, height: u32) -> BlockLocator {
        let height = height.min(self.height());
        let mut hashes = Vec::new();
        let mut step = 1u32;
        let mut current = height as i64;
        while current > 0 {
            if let Some(entry) = self.at(current as u32) {
                hashes.push(entry.hash);
            }
            if hashes.len() >= 10 {
                step = step.saturating_mul(2);
            }
            current -= step as i64;
        }
        hashes.push(self.genesis().hash);
        BlockLocator::new(hashes)
    }
}

// ─── BlockSource ──────────────────────────────────────────────────────────────

/// Source of full block bodies (the local block repository).
///
/// The repository may trail the header chain: `blocks` yields `None` for a
/// body it does not have *yet*. The caller distinguishes "not yet" from
/// "permanently missing" by comparing header times against `store_tip`.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// The most recent block the repository holds, if any.
    async fn store_tip(&self) -> Result<Option<Block>, IndexerError>;

    /// Fetch bodies for `hashes`, in order. `None` entries signal bodies the
    /// repository has not caught up to.
    async fn blocks(
        &self,
        hashes: &[BlockHash],
        cancel: &Cancellation,
    ) -> Result<Vec<Option<Block>>, IndexerError>;
}

/// In-memory block source for tests.
#[derive(Default)]
pub struct MemoryBlockSource {
    inner: std::sync::Mutex<MemoryBlockSourceInner>,
}

#[derive(Default)]
struct MemoryBlockSourceInner {
    blocks: HashMap<BlockHash, Block>,
    tip: Option<BlockHash>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a body and advance the repository tip to it.
    pub fn insert(&self, block: Block) {
        let hash = block.block_hash();
        if let Ok(mut inner) = self.inner.lock() {
            inner.blocks.insert(hash, block);
            inner.tip = Some(hash);
        }
    }

    /// Insert a body without moving the tip (backfilled block).
    pub fn insert_behind_tip(&self, block: Block) {
        let hash = block.block_hash();
        if let Ok(mut inner) = self.inner.lock() {
            inner.blocks.insert(hash, block);
        }
    }

    /// Drop a body, simulating a repository that has not caught up.
    pub fn remove(&self, hash: &BlockHash) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.blocks.remove(hash);
        }
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn store_tip(&self) -> Result<Option<Block>, IndexerError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| IndexerError::Chain("block source lock poisoned".into()))?;
        Ok(inner.tip.and_then(|h| inner.blocks.get(&h).cloned()))
    }

    async fn blocks(
        &self,
        hashes: &[BlockHash],
        cancel: &Cancellation,
    ) -> Result<Vec<Option<Block>>, IndexerError> {
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        let inner = self
            .inner
            .lock()
            .map_err(|_| IndexerError::Chain("block source lock poisoned".into()))?;
        Ok(hashes.iter().map(|h| inner.blocks.get(h).cloned()).collect())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use bitcoin::hashes::Hash;

    fn chain_of(len: u32) -> HeaderChain {
        let mut chain = HeaderChain::new(genesis_header());
        for i in 1..=len {
            let prev = chain.tip().hash;
            chain.push(header(prev, 1_231_006_505 + i * 600, i)).unwrap();
        }
        chain
    }

    #[test]
    fn push_normal_chain() {
        let chain = chain_of(5);
        assert_eq!(chain.height(), 5);
        let tip = chain.tip();
        assert_eq!(chain.get(&tip.hash).unwrap().height, 5);
        assert_eq!(chain.at(3).unwrap().height, 3);
    }

    #[test]
    fn push_rejects_non_extending_header() {
        let mut chain = chain_of(2);
        let foreign = header(BlockHash::all_zeros(), 0, 99);
        assert!(chain.push(foreign).is_err());
    }

    #[test]
    fn rewind_drops_hash_index() {
        let mut chain = chain_of(5);
        let dropped = chain.at(5).unwrap().hash;
        chain.rewind_to(3);
        assert_eq!(chain.height(), 3);
        assert!(chain.get(&dropped).is_none());
    }

    #[test]
    fn find_fork_prefers_most_recent_common_hash() {
        let chain = chain_of(8);
        let locator = BlockLocator::new(vec![
            // unknown hash first, then a real one
            header(chain.tip().hash, 0, 1234).block_hash(),
            chain.at(6).unwrap().hash,
            chain.at(2).unwrap().hash,
        ]);
        assert_eq!(chain.find_fork(&locator).height, 6);
    }

    #[test]
    fn find_fork_falls_back_to_genesis() {
        let chain = chain_of(3);
        let locator = BlockLocator::new(vec![header(BlockHash::all_zeros(), 1, 7).block_hash()]);
        assert_eq!(chain.find_fork(&locator).height, 0);
    }

    #[test]
    fn locator_is_dense_near_tip_and_ends_at_genesis() {
        let chain = chain_of(64);
        let locator = chain.locator_at(64);
        assert_eq!(locator.tip(), Some(chain.tip().hash));
        // First 10 entries step by one
        for (i, hash) in locator.hashes.iter().take(10).enumerate() {
            assert_eq!(*hash, chain.at(64 - i as u32).unwrap().hash);
        }
        assert_eq!(*locator.hashes.last().unwrap(), chain.genesis().hash);
        assert!(locator.hashes.len() < 64);
    }

    #[tokio::test]
    async fn memory_source_distinguishes_missing_bodies() {
        use bitcoin::Block;

        let chain = chain_of(2);
        let source = MemoryBlockSource::new();
        let b1 = Block {
            header: chain.at(1).unwrap().header,
            txdata: vec![],
        };
        source.insert(b1.clone());

        let cancel = Cancellation::new();
        let got = source
            .blocks(&[chain.at(1).unwrap().hash, chain.at(2).unwrap().hash], &cancel)
            .await
            .unwrap();
        assert!(got[0].is_some());
        assert!(got[1].is_none());

        cancel.cancel();
        assert!(source.blocks(&[], &cancel).await.is_err());
    }
}
