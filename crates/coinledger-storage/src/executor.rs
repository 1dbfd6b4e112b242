//! Bounded worker pool that writes batches with retry, split, and blob
//! offload recovery.
//!
//! Producers submit batches through a bounded queue; once the queue is full,
//! `submit` suspends until a worker frees a slot (synchronous backpressure).
//! Each batch write is classified: transient failures back off and retry up
//! to a bounded attempt count, oversized batches split in half, oversized
//! rows move to blob storage behind a pointer row, fatal errors surface at
//! the next `drain`. Checkpoint commits upstream gate on `drain`, so a
//! window is durable before its checkpoint advances.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use coinledger_core::IndexerError;

use crate::batch::Batch;
use crate::blob::{is_offloaded, offload_row, BlobStore};
use crate::table::{BatchOutcome, TableStore};

// ─── RetryPolicy ──────────────────────────────────────────────────────────────

/// Exponential backoff schedule with a jitter window and a delay cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): exponential, capped,
    /// randomized within the upper half of the window.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let millis = capped.as_millis() as u64;
        let half = millis / 2;
        Duration::from_millis(half + fastrand::u64(0..=half.max(1)))
    }
}

// ─── RetryingExecutor ─────────────────────────────────────────────────────────

struct WriteContext {
    store: Arc<dyn TableStore>,
    blob: Arc<dyn BlobStore>,
    table: String,
    policy: RetryPolicy,
    op_timeout: Duration,
}

struct PendingSet {
    count: AtomicUsize,
    done: Notify,
    first_error: std::sync::Mutex<Option<IndexerError>>,
}

impl PendingSet {
    fn record_error(&self, err: IndexerError) {
        if let Ok(mut slot) = self.first_error.lock() {
            if slot.is_none() {
                *slot = Some(err);
            }
        }
    }

    fn take_error(&self) -> Option<IndexerError> {
        self.first_error.lock().ok().and_then(|mut slot| slot.take())
    }

    fn complete_one(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.done.notify_waiters();
        }
    }
}

/// Fixed-size pool of batch-write workers over one table.
pub struct RetryingExecutor {
    tx: mpsc::Sender<Batch>,
    pending: Arc<PendingSet>,
    workers: Vec<JoinHandle<()>>,
}

impl RetryingExecutor {
    pub fn new(
        store: Arc<dyn TableStore>,
        blob: Arc<dyn BlobStore>,
        table: impl Into<String>,
        worker_count: usize,
        queue_capacity: usize,
        policy: RetryPolicy,
        op_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Batch>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(PendingSet {
            count: AtomicUsize::new(0),
            done: Notify::new(),
            first_error: std::sync::Mutex::new(None),
        });
        let ctx = Arc::new(WriteContext {
            store,
            blob,
            table: table.into(),
            policy,
            op_timeout,
        });

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                let pending = Arc::clone(&pending);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    loop {
                        let batch = { rx.lock().await.recv().await };
                        let Some(batch) = batch else { break };
                        if let Err(err) = write_batch(Arc::clone(&ctx), batch).await {
                            tracing::error!(table = %ctx.table, %err, "Batch write failed");
                            pending.record_error(err);
                        }
                        pending.complete_one();
                    }
                })
            })
            .collect();

        Self { tx, pending, workers }
    }

    /// Queue a batch for writing, suspending while the queue is full.
    pub async fn submit(&self, batch: Batch) -> Result<(), IndexerError> {
        if batch.rows.is_empty() {
            return Ok(());
        }
        self.pending.count.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(batch).await.is_err() {
            self.pending.count.fetch_sub(1, Ordering::SeqCst);
            return Err(IndexerError::Storage("executor is shut down".into()));
        }
        Ok(())
    }

    /// Wait for every submitted batch to finish, then surface the first
    /// error recorded since the previous drain, if any.
    pub async fn drain(&self) -> Result<(), IndexerError> {
        loop {
            let notified = self.pending.done.notified();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        match self.pending.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drain outstanding work and join the workers.
    pub async fn shutdown(self) -> Result<(), IndexerError> {
        let Self { tx, pending, workers } = self;
        drop(tx);
        for worker in workers {
            worker
                .await
                .map_err(|e| IndexerError::Storage(format!("worker panicked: {e}")))?;
        }
        match pending.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Write one batch, recovering locally from oversize conditions and backing
/// off on transient failures. Split halves are written inline rather than
/// re-queued, so a full queue can never deadlock a split.
fn write_batch(ctx: Arc<WriteContext>, batch: Batch) -> BoxFuture<'static, Result<(), IndexerError>> {
    Box::pin(async move {
        let mut batch = batch;
        let mut attempt = 0u32;
        loop {
            let write = ctx.store.write_batch(&ctx.table, batch.rows.clone());
            let outcome = match tokio::time::timeout(ctx.op_timeout, write).await {
                Ok(outcome) => outcome,
                Err(_) => BatchOutcome::Transient("storage operation timed out".into()),
            };

            match outcome {
                BatchOutcome::Ok => return Ok(()),
                BatchOutcome::PayloadTooLarge => {
                    if batch.rows.len() <= 1 {
                        // A single row that is still too large as a batch
                        // can only shrink by moving to blob storage.
                        offload_in_place(&ctx, &mut batch, 0).await?;
                        continue;
                    }
                    let right = batch.rows.split_off(batch.rows.len() / 2);
                    tracing::debug!(
                        table = %ctx.table,
                        partition = %batch.partition_key,
                        left = batch.rows.len(),
                        right = right.len(),
                        "Splitting oversized batch"
                    );
                    let right = Batch {
                        partition_key: batch.partition_key.clone(),
                        rows: right,
                    };
                    write_batch(Arc::clone(&ctx), batch).await?;
                    return write_batch(ctx, right).await;
                }
                BatchOutcome::EntityTooLarge(index) => {
                    offload_in_place(&ctx, &mut batch, index).await?;
                }
                BatchOutcome::Transient(err) => {
                    attempt += 1;
                    if attempt >= ctx.policy.max_attempts {
                        return Err(IndexerError::TooManyAttempts {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = ctx.policy.delay(attempt);
                    tracing::warn!(
                        table = %ctx.table,
                        partition = %batch.partition_key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "Transient batch-write failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                BatchOutcome::Fatal(err) => {
                    return Err(IndexerError::Storage(err));
                }
            }
        }
    })
}

async fn offload_in_place(
    ctx: &WriteContext,
    batch: &mut Batch,
    index: usize,
) -> Result<(), IndexerError> {
    let row = batch
        .rows
        .get(index)
        .ok_or_else(|| IndexerError::Storage(format!("oversize index {index} out of bounds")))?;
    if is_offloaded(row) {
        return Err(IndexerError::Storage(
            "pointer row still exceeds store limits".into(),
        ));
    }
    batch.rows[index] = offload_row(ctx.blob.as_ref(), row).await?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{restore_row, MemoryBlobStore};
    use crate::table::{MemoryTableStore, TableLimits, TableRow};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn executor(store: Arc<MemoryTableStore>, policy: RetryPolicy) -> RetryingExecutor {
        RetryingExecutor::new(
            store,
            Arc::new(MemoryBlobStore::new()),
            "t",
            4,
            8,
            policy,
            Duration::from_secs(1),
        )
    }

    fn row(key: &str, payload_len: usize) -> TableRow {
        TableRow::new("p", key).with_column("v", vec![0u8; payload_len])
    }

    fn batch(rows: Vec<TableRow>) -> Batch {
        Batch {
            partition_key: "p".into(),
            rows,
        }
    }

    #[tokio::test]
    async fn writes_reach_the_store() {
        let store = Arc::new(MemoryTableStore::new());
        let exec = executor(Arc::clone(&store), fast_policy(3));

        exec.submit(batch(vec![row("a", 4), row("b", 4)])).await.unwrap();
        exec.submit(batch(vec![row("c", 4)])).await.unwrap();
        exec.drain().await.unwrap();
        assert_eq!(store.row_count("t"), 3);
        exec.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let store = Arc::new(MemoryTableStore::new());
        store.inject_fault(BatchOutcome::Transient("throttled".into()));
        store.inject_fault(BatchOutcome::Transient("throttled".into()));

        let exec = executor(Arc::clone(&store), fast_policy(5));
        exec.submit(batch(vec![row("a", 4)])).await.unwrap();
        exec.drain().await.unwrap();
        assert_eq!(store.row_count("t"), 1);
        exec.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_surface_at_drain() {
        let store = Arc::new(MemoryTableStore::new());
        for _ in 0..3 {
            store.inject_fault(BatchOutcome::Transient("throttled".into()));
        }

        let exec = executor(Arc::clone(&store), fast_policy(3));
        exec.submit(batch(vec![row("a", 4)])).await.unwrap();
        let err = exec.drain().await.unwrap_err();
        assert!(matches!(
            err,
            IndexerError::TooManyAttempts { attempts: 3, .. }
        ));
        assert_eq!(store.row_count("t"), 0);
    }

    #[tokio::test]
    async fn oversized_batches_split_until_they_fit() {
        // The store genuinely refuses multi-row batches, forcing recursive
        // splits down to single rows.
        let store = Arc::new(MemoryTableStore::with_limits(TableLimits {
            max_batch_rows: 1,
            max_batch_bytes: 1 << 20,
            max_row_bytes: 1 << 20,
        }));

        let exec = executor(Arc::clone(&store), fast_policy(3));
        exec.submit(batch(vec![row("a", 4), row("b", 4), row("c", 4), row("d", 4)]))
            .await
            .unwrap();
        exec.drain().await.unwrap();
        assert_eq!(store.row_count("t"), 4);
        exec.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_rows_offload_to_blob_storage() {
        let store = Arc::new(MemoryTableStore::with_limits(TableLimits {
            max_batch_rows: 100,
            max_batch_bytes: 1 << 20,
            max_row_bytes: 64,
        }));
        let blob = Arc::new(MemoryBlobStore::new());
        let exec = RetryingExecutor::new(
            Arc::clone(&store) as Arc<dyn TableStore>,
            Arc::clone(&blob) as Arc<dyn BlobStore>,
            "t",
            2,
            4,
            fast_policy(3),
            Duration::from_secs(1),
        );

        let big = row("big", 512);
        let original = big.clone();
        exec.submit(batch(vec![big])).await.unwrap();
        exec.drain().await.unwrap();

        let stored = store.read("t", "p", "big").await.unwrap().unwrap();
        assert!(is_offloaded(&stored));
        let restored = restore_row(blob.as_ref(), &stored).await.unwrap();
        assert_eq!(restored, original);
        exec.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn fatal_outcomes_propagate_without_retry() {
        let store = Arc::new(MemoryTableStore::new());
        store.inject_fault(BatchOutcome::Fatal("schema mismatch".into()));

        let exec = executor(Arc::clone(&store), fast_policy(5));
        exec.submit(batch(vec![row("a", 4)])).await.unwrap();
        let err = exec.drain().await.unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
    }

    struct HangingStore;

    #[async_trait::async_trait]
    impl TableStore for HangingStore {
        async fn read(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Option<TableRow>, IndexerError> {
            Ok(None)
        }

        async fn write_batch(&self, _: &str, _: Vec<TableRow>) -> BatchOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            BatchOutcome::Ok
        }

        async fn scan(
            &self,
            _: &str,
            _: &str,
            _: &coinledger_core::RowRange,
        ) -> Result<Vec<TableRow>, IndexerError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _: &str, _: &str, _: &str) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn timeouts_count_as_transient_failures() {
        let exec = RetryingExecutor::new(
            Arc::new(HangingStore),
            Arc::new(MemoryBlobStore::new()),
            "t",
            1,
            2,
            fast_policy(2),
            Duration::from_millis(5),
        );
        exec.submit(batch(vec![row("a", 4)])).await.unwrap();
        let err = exec.drain().await.unwrap_err();
        assert!(matches!(err, IndexerError::TooManyAttempts { .. }));
    }

    #[test]
    fn backoff_delays_are_capped_and_jittered() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };
        for attempt in 1..=10 {
            let delay = policy.delay(attempt);
            assert!(delay <= Duration::from_secs(2) + Duration::from_millis(1));
            assert!(delay >= Duration::from_millis(50));
        }
    }
}
