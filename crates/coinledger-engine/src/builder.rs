//! Fluent assembly of a configured indexer.

use std::sync::{Arc, RwLock};

use coinledger_balances::WalletRuleSet;
use coinledger_core::{
    BlockSource, Cancellation, CheckpointStore, HeaderChain, IndexerConfig, IndexerError,
};
use coinledger_storage::{BlobStore, TableStore};

use crate::pipeline::IndexingPipeline;
use crate::task::{
    BalanceIndexTask, BlockIndexTask, IndexTask, TransactionIndexTask, WalletIndexTask,
};

/// Builds an `Indexer` from collaborators and configuration knobs.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    chain: Option<Arc<RwLock<HeaderChain>>>,
    source: Option<Arc<dyn BlockSource>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    table_store: Option<Arc<dyn TableStore>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    rules: WalletRuleSet,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn from_height(mut self, height: u32) -> Self {
        self.config.from_height = height;
        self
    }

    pub fn to_height(mut self, height: u32) -> Self {
        self.config.to_height = Some(height);
        self
    }

    pub fn ignore_checkpoints(mut self, ignore: bool) -> Self {
        self.config.ignore_checkpoints = ignore;
        self
    }

    pub fn batch_size(mut self, rows: usize) -> Self {
        self.config.batch_size = rows;
        self
    }

    pub fn worker_count(mut self, workers: usize) -> Self {
        self.config.worker_count = workers;
        self
    }

    pub fn chain(mut self, chain: Arc<RwLock<HeaderChain>>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn source(mut self, source: Arc<dyn BlockSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn table_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.table_store = Some(store);
        self
    }

    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn wallet_rules(mut self, rules: WalletRuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn build(self) -> Result<Indexer, IndexerError> {
        let missing = |what: &str| IndexerError::Other(format!("indexer builder: {what} not set"));
        let pipeline = IndexingPipeline::new(
            self.config,
            self.chain.ok_or_else(|| missing("header chain"))?,
            self.source.ok_or_else(|| missing("block source"))?,
            self.checkpoints.ok_or_else(|| missing("checkpoint store"))?,
            self.table_store.ok_or_else(|| missing("table store"))?,
            self.blob_store.ok_or_else(|| missing("blob store"))?,
        );
        Ok(Indexer {
            pipeline,
            rules: Arc::new(self.rules),
        })
    }
}

/// A fully wired indexer: one pipeline plus the four per-kind tasks.
pub struct Indexer {
    pipeline: IndexingPipeline,
    rules: Arc<WalletRuleSet>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    pub fn pipeline(&self) -> &IndexingPipeline {
        &self.pipeline
    }

    pub fn tasks(&self) -> Vec<Arc<dyn IndexTask>> {
        vec![
            Arc::new(BlockIndexTask),
            Arc::new(TransactionIndexTask),
            Arc::new(BalanceIndexTask),
            Arc::new(WalletIndexTask::new(Arc::clone(&self.rules))),
        ]
    }

    /// Drive all four index kinds concurrently, each with its own checkpoint,
    /// until every driver reaches the target height or `cancel` fires.
    pub async fn run_all(&self, cancel: &Cancellation) -> Result<(), IndexerError> {
        let mut handles = Vec::new();
        for task in self.tasks() {
            let pipeline = self.pipeline.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                pipeline.run(task, &cancel).await
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| IndexerError::Other(format!("index driver panicked: {e}")))??;
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
