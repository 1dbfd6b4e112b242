//! The per-kind indexing driver.
//!
//! One run of `index_window` walks `Setup → {Extract→Batch→Flush}* →
//! FinalFlush → SaveCheckpoint → Done`, with a mid-run checkpoint whenever
//! the configured interval elapses: the batcher is flushed, in-flight writes
//! drain, and only then does the checkpoint advance. `run` repeats windows
//! against fresh chain snapshots, polling once the stream is caught up,
//! until the optional target height is reached or the run is cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use coinledger_core::{
    BlockFetcher, BlockSource, Cancellation, CheckpointManager, CheckpointStore, HeaderChain,
    IndexKind, IndexerConfig, IndexerError,
};
use coinledger_storage::{
    BlobStore, BulkBatcher, RetryPolicy, RetryingExecutor, TableLimits, TableStore,
};

use crate::task::IndexTask;

// ─── IndexedHeights ───────────────────────────────────────────────────────────

/// Last committed height per kind. The externally reported indexed height is
/// the minimum across all kinds, since each advances independently.
#[derive(Default)]
pub struct IndexedHeights {
    heights: Mutex<HashMap<IndexKind, u32>>,
}

impl IndexedHeights {
    pub fn record(&self, kind: IndexKind, height: u32) {
        if let Ok(mut heights) = self.heights.lock() {
            let entry = heights.entry(kind).or_insert(height);
            *entry = (*entry).max(height);
        }
    }

    pub fn get(&self, kind: IndexKind) -> Option<u32> {
        self.heights.lock().ok().and_then(|h| h.get(&kind).copied())
    }

    /// Height up to which every kind has been indexed.
    pub fn indexed_height(&self) -> u32 {
        self.heights
            .lock()
            .map(|heights| {
                IndexKind::ALL
                    .iter()
                    .map(|kind| heights.get(kind).copied().unwrap_or(0))
                    .min()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

// ─── IndexingPipeline ─────────────────────────────────────────────────────────

/// Drives index tasks over the chain with checkpointing, batching, and
/// retrying writes. Cloneable; clones share collaborators and progress.
#[derive(Clone)]
pub struct IndexingPipeline {
    config: IndexerConfig,
    chain: Arc<RwLock<HeaderChain>>,
    source: Arc<dyn BlockSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    table_store: Arc<dyn TableStore>,
    blob_store: Arc<dyn BlobStore>,
    heights: Arc<IndexedHeights>,
}

impl IndexingPipeline {
    pub fn new(
        config: IndexerConfig,
        chain: Arc<RwLock<HeaderChain>>,
        source: Arc<dyn BlockSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        table_store: Arc<dyn TableStore>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            chain,
            source,
            checkpoints,
            table_store,
            blob_store,
            heights: Arc::new(IndexedHeights::default()),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn heights(&self) -> &IndexedHeights {
        &self.heights
    }

    fn chain_snapshot(&self) -> Result<HeaderChain, IndexerError> {
        self.chain
            .read()
            .map(|chain| chain.clone())
            .map_err(|_| IndexerError::Chain("header chain lock poisoned".into()))
    }

    /// Run `task` continuously: index a window, then poll for new blocks,
    /// until the configured target height is reached or `cancel` fires.
    pub async fn run(
        &self,
        task: Arc<dyn IndexTask>,
        cancel: &Cancellation,
    ) -> Result<(), IndexerError> {
        let kind = task.kind();
        let manager = CheckpointManager::new(Arc::clone(&self.checkpoints), &self.config.namespace, kind);
        if self.config.ignore_checkpoints {
            tracing::info!(kind = %kind, from = self.config.from_height, "Discarding checkpoint, full rescan");
            manager.reset().await?;
        }

        loop {
            let processed = self.index_window(task.as_ref(), &manager, cancel).await?;
            if cancel.is_cancelled() {
                tracing::info!(kind = %kind, height = processed, "Indexing cancelled");
                return Ok(());
            }
            if let Some(to) = self.config.to_height {
                if processed >= to {
                    tracing::info!(kind = %kind, height = processed, "Reached target height");
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    /// Index one window against a chain snapshot. Returns the height the
    /// checkpoint now covers (the fork point if nothing new was yielded).
    async fn index_window(
        &self,
        task: &dyn IndexTask,
        manager: &CheckpointManager,
        cancel: &Cancellation,
    ) -> Result<u32, IndexerError> {
        let kind = task.kind();
        let snapshot = self.chain_snapshot()?;
        let genesis = snapshot.genesis().hash;
        let checkpoint = manager.load_or_genesis(genesis).await?;
        let mut fetcher = BlockFetcher::new(
            &checkpoint,
            &snapshot,
            Arc::clone(&self.source),
            self.config.from_height,
            self.config.to_height,
        );

        if task.is_noop() {
            fetcher.skip_to_end();
            let entry = fetcher.last_processed().unwrap_or(fetcher.fork());
            manager
                .commit(snapshot.locator_at(entry.height), genesis)
                .await?;
            self.heights.record(kind, entry.height);
            tracing::debug!(kind = %kind, height = entry.height, "No-op task, checkpoint fast-forwarded");
            return Ok(entry.height);
        }

        let executor = RetryingExecutor::new(
            Arc::clone(&self.table_store),
            Arc::clone(&self.blob_store),
            self.config.table_name(kind),
            self.config.worker_count,
            self.config.queue_capacity,
            RetryPolicy {
                max_attempts: self.config.max_attempts,
                ..RetryPolicy::default()
            },
            self.config.op_timeout(),
        );
        let mut batcher = BulkBatcher::new(TableLimits {
            max_batch_rows: self.config.batch_size,
            max_batch_bytes: self.config.batch_bytes,
            ..TableLimits::default()
        });

        let mut stream_error = None;
        loop {
            let info = match fetcher.next(cancel).await {
                Ok(Some(info)) => info,
                Ok(None) => break,
                // Cooperative stop: finish in-flight writes, keep the window.
                Err(IndexerError::Cancelled) => break,
                Err(err) => {
                    stream_error = Some(err);
                    break;
                }
            };

            for row in task.rows(&info)? {
                batcher.push(row);
            }
            while let Some(batch) = batcher.pop_ready() {
                executor.submit(batch).await?;
            }

            if fetcher.needs_save(self.config.checkpoint_interval()) {
                for batch in batcher.flush() {
                    executor.submit(batch).await?;
                }
                executor.drain().await?;
                if let Some(entry) = fetcher.last_processed() {
                    manager
                        .commit(snapshot.locator_at(entry.height), genesis)
                        .await?;
                    self.heights.record(kind, entry.height);
                    tracing::info!(kind = %kind, height = entry.height, "Mid-run checkpoint committed");
                }
                fetcher.mark_saved();
            }
        }

        if let Some(err) = stream_error {
            // The window is abandoned; the checkpoint stays at the last
            // durable commit so a restart re-indexes only this window.
            let _ = executor.shutdown().await;
            return Err(err);
        }

        for batch in batcher.flush() {
            executor.submit(batch).await?;
        }
        executor.drain().await?;
        executor.shutdown().await?;

        match fetcher.last_processed() {
            Some(entry) => {
                manager
                    .commit(snapshot.locator_at(entry.height), genesis)
                    .await?;
                self.heights.record(kind, entry.height);
                tracing::info!(kind = %kind, height = entry.height, "Window indexed");
                Ok(entry.height)
            }
            None => Ok(fetcher.fork().height),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
