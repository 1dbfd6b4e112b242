//! Fork-aware, resumable block streaming.
//!
//! A `BlockFetcher` is created per window from a checkpoint and a snapshot of
//! the header chain. It resolves the checkpoint's locator to a fork point,
//! enumerates headers strictly after it, and fetches bodies from the block
//! source in bounded look-ahead chunks, yielding a gap-free ordered sequence
//! of `BlockInfo`.
//!
//! A body the source does not have yet ends the stream early (the caller
//! polls again later); a body missing although the source is caught up is a
//! hard inconsistency.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::Block;

use crate::chain::{BlockSource, HeaderChain, HeaderEntry};
use crate::checkpoint::Checkpoint;
use crate::error::IndexerError;
use crate::types::{BlockInfo, Cancellation};

/// How many bodies to request from the source per round trip.
const BODY_LOOKAHEAD: usize = 16;

pub struct BlockFetcher {
    source: Arc<dyn BlockSource>,
    /// Headers still to be yielded, oldest first.
    planned: Vec<HeaderEntry>,
    /// Index of the next planned header not yet requested.
    cursor: usize,
    buffer: VecDeque<(HeaderEntry, Block)>,
    fork: HeaderEntry,
    last_processed: Option<HeaderEntry>,
    last_saved: Instant,
    exhausted: bool,
}

impl BlockFetcher {
    /// Plan a stream from `checkpoint` over `chain`, bounded by
    /// `[from, to]` (and by the chain tip).
    pub fn new(
        checkpoint: &Checkpoint,
        chain: &HeaderChain,
        source: Arc<dyn BlockSource>,
        from: u32,
        to: Option<u32>,
    ) -> Self {
        let fork = chain.find_fork(&checkpoint.locator);
        let to = to.unwrap_or(chain.height()).min(chain.height());

        let mut planned = Vec::new();
        if fork.height <= to {
            let mut start = fork.height.saturating_add(1).max(from);
            // Off-by-one at the chain origin: resuming right after genesis
            // must still index the genesis block itself.
            if start == 1 {
                start = 0;
            }
            for height in start..=to {
                if let Some(entry) = chain.at(height) {
                    planned.push(entry);
                }
            }
        } else {
            tracing::debug!(
                fork = fork.height,
                to,
                "Fork point beyond requested range, stale view"
            );
        }

        tracing::debug!(
            fork = fork.height,
            planned = planned.len(),
            to,
            "Planned fetch window"
        );

        Self {
            source,
            planned,
            cursor: 0,
            buffer: VecDeque::new(),
            fork,
            last_processed: None,
            last_saved: Instant::now(),
            exhausted: false,
        }
    }

    /// The fork point the stream resumes after.
    pub fn fork(&self) -> HeaderEntry {
        self.fork
    }

    /// The most recently yielded header (or the one skipped to).
    pub fn last_processed(&self) -> Option<HeaderEntry> {
        self.last_processed
    }

    /// Yield the next block, or `None` when the window is done or the source
    /// has not caught up yet.
    pub async fn next(
        &mut self,
        cancel: &Cancellation,
    ) -> Result<Option<BlockInfo>, IndexerError> {
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fill_buffer(cancel).await?;
        }
        match self.buffer.pop_front() {
            Some((entry, block)) => {
                self.last_processed = Some(entry);
                Ok(Some(BlockInfo {
                    height: entry.height,
                    hash: entry.hash,
                    block,
                }))
            }
            None => Ok(None),
        }
    }

    async fn fill_buffer(&mut self, cancel: &Cancellation) -> Result<(), IndexerError> {
        let window = &self.planned[self.cursor..];
        if window.is_empty() {
            self.exhausted = true;
            return Ok(());
        }
        let chunk: Vec<_> = window.iter().take(BODY_LOOKAHEAD).copied().collect();
        let hashes: Vec<_> = chunk.iter().map(|e| e.hash).collect();
        let bodies = self.source.blocks(&hashes, cancel).await?;

        for (entry, body) in chunk.iter().zip(bodies) {
            match body {
                Some(block) => {
                    self.cursor += 1;
                    self.buffer.push_back((*entry, block));
                }
                None => {
                    self.classify_missing(entry).await?;
                    // Source not caught up yet: end the stream, not an error.
                    tracing::debug!(
                        height = entry.height,
                        hash = %entry.hash,
                        "Block body not available yet, ending stream early"
                    );
                    self.exhausted = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// A missing body is fatal when the header is older than the source's own
    /// tip: the source claims to be past it, so the body should exist.
    async fn classify_missing(&self, entry: &HeaderEntry) -> Result<(), IndexerError> {
        if let Some(tip) = self.source.store_tip().await? {
            if entry.header.time < tip.header.time {
                return Err(IndexerError::InconsistentSource {
                    hash: entry.hash.to_string(),
                    height: entry.height,
                });
            }
        }
        Ok(())
    }

    /// `true` when a checkpoint commit is due.
    pub fn needs_save(&self, interval: Duration) -> bool {
        self.last_saved.elapsed() >= interval
    }

    /// Reset the checkpoint clock after a successful commit.
    pub fn mark_saved(&mut self) {
        self.last_saved = Instant::now();
    }

    /// Fast-forward `last_processed` to the end of the window without reading
    /// bodies. Used when no extraction will happen (empty rule set).
    pub fn skip_to_end(&mut self) {
        self.last_processed = self.planned.last().copied().or(Some(self.fork));
        self.cursor = self.planned.len();
        self.buffer.clear();
        self.exhausted = true;
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
