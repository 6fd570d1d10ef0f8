//! Search engine facade and transaction handle
//!
//! [`SearchEngine`] owns the main index store, the configuration and the
//! executors, and hands out [`Transaction`]s built by the
//! [`TransactionFactory`].
//!
//! ## Opening
//!
//! ```text
//! let engine = SearchEngine::open_dir("/var/lib/vellum")?;   // reads vellum.toml
//! let engine = SearchEngine::in_memory(VellumConfig::default())?;
//! ```

use crate::factory::TransactionFactory;
use crate::processor::{ProcessorContext, TransactionProcessor, TransactionState};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vellum_core::{
    IdGenerator, ProcessorKind, Query, Resource, ResourceKey, Result, UuidIds, VellumConfig,
    CONFIG_FILE_NAME,
};
use vellum_storage::{Hit, IndexStore, SearchFilter, SpawnExecutor, TaskExecutor, ThreadPoolExecutor};

const MERGE_QUEUE_DEPTH: usize = 1024;

/// Entry point: a partitioned index with transactional access.
#[derive(Debug)]
pub struct SearchEngine {
    config: VellumConfig,
    store: Arc<IndexStore>,
    factory: TransactionFactory,
}

impl SearchEngine {
    /// Engine whose main index lives in memory.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` does not validate.
    pub fn in_memory(config: VellumConfig) -> Result<Self> {
        config.validate()?;
        let merges = merge_executor(&config)?;
        let store = Arc::new(IndexStore::in_memory(config.index.clone(), merges));
        Ok(Self::assemble(config, store))
    }

    /// Engine whose partitions are stored under `root`.
    pub fn open(root: impl AsRef<Path>, config: VellumConfig) -> Result<Self> {
        config.validate()?;
        let merges = merge_executor(&config)?;
        let store = Arc::new(IndexStore::open(root.as_ref(), config.index.clone(), merges)?);
        info!(
            target: "vellum::engine",
            root = %root.as_ref().display(),
            processor = ?config.transaction.processor,
            "Opened search engine"
        );
        Ok(Self::assemble(config, store))
    }

    /// Open `root`, reading `vellum.toml` there (written with defaults if
    /// missing).
    pub fn open_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let config_path = root.join(CONFIG_FILE_NAME);
        VellumConfig::write_default_if_missing(&config_path)?;
        let config = VellumConfig::from_file(&config_path)?;
        Self::open(root, config)
    }

    fn assemble(config: VellumConfig, store: Arc<IndexStore>) -> Self {
        let ctx = ProcessorContext {
            store: Arc::clone(&store),
            transaction: config.transaction.clone(),
            scheme: config.partitions.clone(),
            ids: Arc::new(UuidIds),
            job_executor: Arc::new(SpawnExecutor::new("vellum-jobs")),
        };
        SearchEngine {
            config,
            store,
            factory: TransactionFactory::new(ctx),
        }
    }

    /// Replace the overlay name generator.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        let mut ctx = self.factory.context().clone();
        ctx.ids = ids;
        self.factory = TransactionFactory::new(ctx);
        self
    }

    /// Replace the executor running job workers.
    pub fn with_job_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        let mut ctx = self.factory.context().clone();
        ctx.job_executor = executor;
        self.factory = TransactionFactory::new(ctx);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &VellumConfig {
        &self.config
    }

    /// Main index store.
    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Processor factory.
    pub fn factory(&self) -> &TransactionFactory {
        &self.factory
    }

    /// Begin a transaction with the configured processor.
    pub fn begin(&self) -> Result<Transaction> {
        Transaction::begin(self.factory.create())
    }

    /// Begin a transaction with an explicit processor.
    pub fn begin_with(&self, kind: ProcessorKind) -> Result<Transaction> {
        Transaction::begin(self.factory.create_kind(kind))
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let tx = self.begin()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(target: "vellum::engine", error = %rollback, "Rollback after failure also failed");
                }
                Err(e)
            }
        }
    }

    /// Search committed data outside any transaction.
    pub fn find(&self, query: &Query) -> Result<Vec<Hit>> {
        let tx = self.begin_with(ProcessorKind::SearchOnly)?;
        let hits = tx.find(query)?;
        tx.commit()?;
        Ok(hits)
    }

    /// Load one committed resource outside any transaction.
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        let tx = self.begin_with(ProcessorKind::SearchOnly)?;
        let resource = tx.get(key)?;
        tx.commit()?;
        Ok(resource)
    }
}

fn merge_executor(config: &VellumConfig) -> Result<Arc<dyn TaskExecutor>> {
    Ok(Arc::new(ThreadPoolExecutor::new(
        "vellum-merge",
        config.index.max_concurrent_merges,
        MERGE_QUEUE_DEPTH,
    )?))
}

/// A running transaction.
///
/// Dropping a transaction that was neither committed nor rolled back rolls
/// it back.
#[derive(Debug)]
pub struct Transaction {
    processor: TransactionProcessor,
}

impl Transaction {
    fn begin(processor: TransactionProcessor) -> Result<Self> {
        processor.begin()?;
        Ok(Transaction { processor })
    }

    /// Processor driving this transaction.
    pub fn processor(&self) -> &TransactionProcessor {
        &self.processor
    }

    /// Lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.processor.state()
    }

    /// Add a resource.
    pub fn create(&self, resource: Resource) -> Result<()> {
        self.processor.create(resource)
    }

    /// Replace a resource.
    pub fn update(&self, resource: Resource) -> Result<()> {
        self.processor.update(resource)
    }

    /// Remove a resource.
    pub fn delete(&self, key: ResourceKey) -> Result<()> {
        self.processor.delete(key)
    }

    /// Remove every match of `query`, limited to `aliases` if given.
    pub fn delete_by_query(&self, query: Query, aliases: &[String]) -> Result<()> {
        self.processor.delete_by_query(query, aliases)
    }

    /// Search every partition.
    pub fn find(&self, query: &Query) -> Result<Vec<Hit>> {
        self.processor.find(query)
    }

    /// Search selected partitions and aliases.
    pub fn internal_search(
        &self,
        query: &Query,
        partitions: &[String],
        aliases: &[String],
        filter: Option<Arc<dyn SearchFilter>>,
    ) -> Result<Vec<Hit>> {
        self.processor
            .internal_search(query, partitions, aliases, filter)
    }

    /// Number of hits.
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.processor.count(query)
    }

    /// Load one resource.
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        self.processor.get(key)
    }

    /// Apply queued operations.
    pub fn flush(&self) -> Result<()> {
        self.processor.flush()
    }

    /// Publish the partitions of `aliases` without ending the transaction.
    pub fn flush_commit(&self, aliases: &[String]) -> Result<()> {
        self.processor.flush_commit(aliases)
    }

    /// First phase of a two-phase commit.
    pub fn prepare(&self) -> Result<()> {
        self.processor.prepare()
    }

    /// Second phase of a two-phase commit.
    pub fn commit_prepared(self) -> Result<()> {
        self.processor.commit(false)
    }

    /// One-phase commit.
    pub fn commit(self) -> Result<()> {
        self.processor.commit(true)
    }

    /// Discard the transaction.
    pub fn rollback(self) -> Result<()> {
        self.processor.rollback()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.processor.state().is_active() {
            if let Err(e) = self.processor.rollback() {
                warn!(target: "vellum::engine", error = %e, "Rollback on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vellum_core::{Error, PartitionScheme};

    fn key(id: &str) -> ResourceKey {
        ResourceKey::single("Doc", id, &PartitionScheme::Alias)
    }

    fn engine() -> SearchEngine {
        let mut config = VellumConfig::default();
        config.index.reader_refresh_interval_ms = 0;
        SearchEngine::in_memory(config).unwrap()
    }

    #[test]
    fn test_transaction_helper_commits_and_rolls_back() {
        let engine = engine();
        engine
            .transaction(|tx| tx.create(Resource::new(key("1"))))
            .unwrap();
        assert!(engine.get(&key("1")).unwrap().is_some());

        let err = engine
            .transaction(|tx| {
                tx.create(Resource::new(key("2")))?;
                Err::<(), _>(Error::InvalidOperation("abort".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(engine.get(&key("2")).unwrap().is_none());
    }

    #[test]
    fn test_drop_rolls_back() {
        let engine = engine();
        {
            let tx = engine.begin().unwrap();
            tx.create(Resource::new(key("1"))).unwrap();
        }
        assert!(engine.get(&key("1")).unwrap().is_none());
        // The writer lock was released by the rollback
        engine
            .transaction(|tx| tx.create(Resource::new(key("1"))))
            .unwrap();
        assert_eq!(engine.find(&Query::All).unwrap().len(), 1);
    }

    #[test]
    fn test_open_dir_writes_default_config() {
        let tmp = TempDir::new().unwrap();
        let engine = SearchEngine::open_dir(tmp.path()).unwrap();
        assert!(tmp.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(engine.config().transaction.processor, ProcessorKind::ReadCommitted);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = VellumConfig::default();
        config.transaction.concurrency_level = 0;
        assert!(matches!(
            SearchEngine::in_memory(config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
