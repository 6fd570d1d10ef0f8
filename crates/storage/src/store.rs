//! The main index store: one directory per partition
//!
//! The store hands out directories and writers, and caches one reader per
//! partition. Cached readers are refreshed lazily once they are older than
//! the configured refresh interval, and immediately after
//! [`IndexStore::invalidate`].

use crate::background::TaskExecutor;
use crate::directory::{Directory, FsDirectory, RamDirectory};
use crate::reader::{IndexReader, ReaderOptions};
use crate::writer::{IndexWriter, WriterOptions};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use vellum_core::{Error, IndexConfig, Result};

#[derive(Debug, Clone)]
enum Backend {
    Ram,
    Fs(PathBuf),
}

#[derive(Debug, Clone)]
struct CachedReader {
    reader: Arc<IndexReader>,
    checked: Instant,
    stale: bool,
}

/// Partitioned main index.
#[derive(Debug)]
pub struct IndexStore {
    backend: Backend,
    config: IndexConfig,
    merge_executor: Arc<dyn TaskExecutor>,
    directories: DashMap<String, Arc<dyn Directory>>,
    readers: DashMap<String, CachedReader>,
}

impl IndexStore {
    /// Store whose partitions live in memory.
    pub fn in_memory(config: IndexConfig, merge_executor: Arc<dyn TaskExecutor>) -> Self {
        Self::with_backend(Backend::Ram, config, merge_executor)
    }

    /// Store whose partitions are subdirectories of `root`.
    ///
    /// # Errors
    ///
    /// `StorageOpen` if `root` cannot be created.
    pub fn open(
        root: impl AsRef<Path>,
        config: IndexConfig,
        merge_executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::storage_open(root.display().to_string(), e))?;
        Ok(Self::with_backend(Backend::Fs(root), config, merge_executor))
    }

    fn with_backend(
        backend: Backend,
        config: IndexConfig,
        merge_executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        IndexStore {
            backend,
            config,
            merge_executor,
            directories: DashMap::new(),
            readers: DashMap::new(),
        }
    }

    /// Index settings.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Executor used for background merges.
    pub fn merge_executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.merge_executor
    }

    /// Directory of `partition`, created on first use.
    pub fn directory(&self, partition: &str) -> Result<Arc<dyn Directory>> {
        validate_partition(partition)?;
        if let Some(dir) = self.directories.get(partition) {
            return Ok(Arc::clone(dir.value()));
        }
        let dir: Arc<dyn Directory> = match &self.backend {
            Backend::Ram => Arc::new(RamDirectory::new(partition)),
            Backend::Fs(root) => Arc::new(FsDirectory::open(root.join(partition))?),
        };
        Ok(Arc::clone(
            self.directories
                .entry(partition.to_string())
                .or_insert(dir)
                .value(),
        ))
    }

    /// Open the writer of `partition`.
    pub fn open_writer(&self, partition: &str) -> Result<IndexWriter> {
        IndexWriter::open(
            self.directory(partition)?,
            WriterOptions::from(&self.config),
            Arc::clone(&self.merge_executor),
        )
    }

    /// Current reader of `partition`.
    ///
    /// Returns the cached reader unless it is older than the refresh
    /// interval, in which case a newer commit is picked up if one exists.
    pub fn reader(&self, partition: &str) -> Result<Arc<IndexReader>> {
        let interval = self.config.reader_refresh_interval();
        let cached = self.readers.get(partition).map(|c| c.value().clone());
        let reader = match cached {
            Some(cached) if !cached.stale && cached.checked.elapsed() < interval => {
                return Ok(cached.reader)
            }
            Some(cached) => match cached.reader.reopen()? {
                Some(newer) => Arc::new(newer),
                None => cached.reader,
            },
            None => Arc::new(IndexReader::open_with(
                self.directory(partition)?,
                ReaderOptions::from(&self.config),
            )?),
        };
        self.readers.insert(
            partition.to_string(),
            CachedReader {
                reader: Arc::clone(&reader),
                checked: Instant::now(),
                stale: false,
            },
        );
        Ok(reader)
    }

    /// Force the next [`IndexStore::reader`] call for `partition` to refresh.
    pub fn invalidate(&self, partition: &str) {
        if let Some(mut cached) = self.readers.get_mut(partition) {
            cached.stale = true;
            debug!(target: "vellum::storage", partition, "Invalidated cached reader");
        }
    }

    /// Partitions opened so far, sorted.
    pub fn partitions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.directories.iter().map(|e| e.key().clone()).collect();
        if let Backend::Fs(root) = &self.backend {
            if let Ok(entries) = std::fs::read_dir(root) {
                for entry in entries.flatten() {
                    if entry.path().is_dir() {
                        if let Some(name) = entry.file_name().to_str() {
                            names.push(name.to_string());
                        }
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

fn validate_partition(partition: &str) -> Result<()> {
    if partition.is_empty()
        || partition == "."
        || partition == ".."
        || partition.contains(['/', '\\'])
    {
        return Err(Error::InvalidOperation(format!(
            "invalid partition name {:?}",
            partition
        )));
    }
    Ok(())
}
