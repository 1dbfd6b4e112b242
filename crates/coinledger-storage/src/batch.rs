//! Groups rows into bounded per-partition batches for bulk upserts.
//!
//! Rows accumulate in FIFO queues keyed by partition. A queue that reaches
//! the row bound is dequeued whole; a queue that would exceed the byte bound
//! with the next row is dequeued early, before the row joins a fresh queue.
//! `flush` drains all partial queues regardless of size.

use std::collections::{HashMap, VecDeque};

use crate::table::{TableLimits, TableRow};

// ─── Batch ────────────────────────────────────────────────────────────────────

/// A group of rows sharing one partition key, ready for one atomic upsert.
#[derive(Debug, Clone)]
pub struct Batch {
    pub partition_key: String,
    pub rows: Vec<TableRow>,
}

impl Batch {
    pub fn byte_size(&self) -> usize {
        self.rows.iter().map(TableRow::byte_size).sum()
    }
}

// ─── BulkBatcher ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct PartitionQueue {
    rows: Vec<TableRow>,
    bytes: usize,
}

/// Accumulates rows and emits batches that never exceed the configured
/// row-count or byte bounds.
pub struct BulkBatcher {
    limits: TableLimits,
    queues: HashMap<String, PartitionQueue>,
    ready: VecDeque<Batch>,
}

impl BulkBatcher {
    pub fn new(limits: TableLimits) -> Self {
        Self {
            limits,
            queues: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    /// Add a row to its partition queue, moving the queue to the ready list
    /// if a bound is reached.
    pub fn push(&mut self, row: TableRow) {
        let partition = row.partition_key.clone();
        let row_bytes = row.byte_size();
        let queue = self.queues.entry(partition.clone()).or_default();

        if !queue.rows.is_empty() && queue.bytes + row_bytes > self.limits.max_batch_bytes {
            let rows = std::mem::take(&mut queue.rows);
            queue.bytes = 0;
            self.ready.push_back(Batch {
                partition_key: partition.clone(),
                rows,
            });
        }

        let queue = self.queues.entry(partition.clone()).or_default();
        queue.rows.push(row);
        queue.bytes += row_bytes;

        if queue.rows.len() >= self.limits.max_batch_rows {
            let rows = std::mem::take(&mut queue.rows);
            queue.bytes = 0;
            self.ready.push_back(Batch {
                partition_key: partition,
                rows,
            });
        }
    }

    /// Next full batch, FIFO across partitions.
    pub fn pop_ready(&mut self) -> Option<Batch> {
        self.ready.pop_front()
    }

    /// Drain everything: ready batches first, then all partial queues.
    pub fn flush(&mut self) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self.ready.drain(..).collect();
        let mut partials: Vec<_> = self
            .queues
            .drain()
            .filter(|(_, queue)| !queue.rows.is_empty())
            .collect();
        // Deterministic flush order.
        partials.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (partition_key, queue) in partials {
            batches.push(Batch {
                partition_key,
                rows: queue.rows,
            });
        }
        batches
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.queues.values().all(|q| q.rows.is_empty())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(rows: usize, bytes: usize) -> TableLimits {
        TableLimits {
            max_batch_rows: rows,
            max_batch_bytes: bytes,
            max_row_bytes: bytes,
        }
    }

    fn row(partition: &str, key: &str, payload_len: usize) -> TableRow {
        TableRow::new(partition, key).with_column("v", vec![0u8; payload_len])
    }

    #[test]
    fn row_bound_dequeues_whole_queue() {
        let mut batcher = BulkBatcher::new(limits(3, 1 << 20));
        batcher.push(row("p", "a", 0));
        batcher.push(row("p", "b", 0));
        assert!(batcher.pop_ready().is_none());

        batcher.push(row("p", "c", 0));
        let batch = batcher.pop_ready().unwrap();
        assert_eq!(batch.partition_key, "p");
        assert_eq!(batch.rows.len(), 3);
        assert!(batcher.is_empty());
    }

    #[test]
    fn byte_bound_dequeues_before_overflow() {
        let mut batcher = BulkBatcher::new(limits(100, 100));
        batcher.push(row("p", "a", 60));
        batcher.push(row("p", "b", 60));

        let batch = batcher.pop_ready().unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert!(batch.byte_size() <= 100);
        assert_eq!(batch.rows[0].row_key, "a");

        // The overflowing row started a fresh queue.
        let partials = batcher.flush();
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].rows[0].row_key, "b");
    }

    #[test]
    fn partitions_batch_independently() {
        let mut batcher = BulkBatcher::new(limits(2, 1 << 20));
        batcher.push(row("p1", "a", 0));
        batcher.push(row("p2", "a", 0));
        batcher.push(row("p1", "b", 0));

        let batch = batcher.pop_ready().unwrap();
        assert_eq!(batch.partition_key, "p1");
        assert!(batch.rows.iter().all(|r| r.partition_key == "p1"));
        assert!(batcher.pop_ready().is_none());
    }

    #[test]
    fn flush_drains_partials_in_partition_order() {
        let mut batcher = BulkBatcher::new(limits(10, 1 << 20));
        batcher.push(row("p2", "a", 0));
        batcher.push(row("p1", "a", 0));

        let batches = batcher.flush();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].partition_key, "p1");
        assert_eq!(batches[1].partition_key, "p2");
        assert!(batcher.is_empty());
    }
}
