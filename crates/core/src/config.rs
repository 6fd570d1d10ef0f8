//! Engine configuration via `vellum.toml`
//!
//! All settings have defaults, so an empty file (or no file at all) yields a
//! working in-memory configuration. `validate()` is run by `from_file` and by
//! the engine on open.

use crate::error::{Error, Result};
use crate::job::Hashing;
use crate::resource::PartitionScheme;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name conventionally placed next to the index.
pub const CONFIG_FILE_NAME: &str = "vellum.toml";

/// Prefix selecting in-memory overlay storage.
pub const RAM_PREFIX: &str = "ram://";

/// Transaction processor variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    /// Overlay-backed read-committed isolation.
    ReadCommitted,
    /// Writes go straight to the main writers.
    DirectWriter,
    /// Create-only bulk loading.
    BatchInsert,
    /// Read-only transactions.
    SearchOnly,
}

/// Where overlay (transaction log) indexes are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLocation {
    /// In memory.
    Ram,
    /// Under a directory prefix; each overlay gets its own sub-directory.
    Fs(PathBuf),
}

/// Transaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Processor variant.
    pub processor: ProcessorKind,
    /// `ram://` or a file-system prefix for overlay storage.
    pub log_location: String,
    /// Compact overlay indexes before merging them on commit.
    pub optimize_on_commit: bool,
    /// Dispatch dirty operations to background workers.
    pub concurrent_operations: bool,
    /// Number of workers.
    pub concurrency_level: usize,
    /// Routing key used to pick a worker.
    pub hashing: Hashing,
    /// Queue capacity per worker.
    pub backlog: usize,
    /// Maximum time `add_job` blocks on a full backlog.
    pub add_timeout_ms: u64,
    /// Drop cached main-store readers of a partition as soon as it commits.
    pub invalidate_cache_on_commit: bool,
    /// Apply batch-insert jobs in submission order (inline) instead of
    /// dispatching them to workers.
    pub maintain_order: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorKind::ReadCommitted,
            log_location: RAM_PREFIX.to_string(),
            optimize_on_commit: true,
            concurrent_operations: true,
            concurrency_level: 5,
            hashing: Hashing::Uid,
            backlog: 100,
            add_timeout_ms: 10_000,
            invalidate_cache_on_commit: true,
            maintain_order: true,
        }
    }
}

impl TransactionConfig {
    /// Parsed overlay storage location.
    pub fn log_location(&self) -> LogLocation {
        match self.log_location.strip_prefix(RAM_PREFIX) {
            Some(_) => LogLocation::Ram,
            None => LogLocation::Fs(PathBuf::from(&self.log_location)),
        }
    }

    /// Add timeout as a `Duration`.
    pub fn add_timeout(&self) -> Duration {
        Duration::from_millis(self.add_timeout_ms)
    }
}

/// Index store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// How long a writer waits for the partition write lock.
    pub lock_timeout_ms: u64,
    /// Poll interval while waiting for a lock.
    pub lock_poll_interval_ms: u64,
    /// Segment count that triggers a background merge.
    pub merge_factor: usize,
    /// Maximum merges running at once.
    pub max_concurrent_merges: usize,
    /// How long a cached main-store reader is trusted before re-checking.
    pub reader_refresh_interval_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            lock_poll_interval_ms: 100,
            merge_factor: 10,
            max_concurrent_merges: 2,
            reader_refresh_interval_ms: 5_000,
        }
    }
}

impl IndexConfig {
    /// Lock timeout as a `Duration`.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Lock poll interval as a `Duration`.
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    /// Reader refresh interval as a `Duration`.
    pub fn reader_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.reader_refresh_interval_ms)
    }
}

/// Full configuration loaded from `vellum.toml`.
///
/// # Example
///
/// ```toml
/// [transaction]
/// processor = "read_committed"
/// log_location = "ram://"
/// concurrency_level = 5
/// hashing = "uid"
///
/// [partitions]
/// scheme = "modulo"
/// prefix = "index"
/// size = 4
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VellumConfig {
    /// Transaction settings.
    pub transaction: TransactionConfig,
    /// Index store settings.
    pub index: IndexConfig,
    /// Partition assignment.
    pub partitions: PartitionScheme,
}

impl VellumConfig {
    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        let tx = &self.transaction;
        if tx.concurrency_level == 0 {
            return Err(Error::InvalidConfig(
                "transaction.concurrency_level must be at least 1".to_string(),
            ));
        }
        if tx.backlog == 0 {
            return Err(Error::InvalidConfig(
                "transaction.backlog must be at least 1".to_string(),
            ));
        }
        if tx.log_location.is_empty() {
            return Err(Error::InvalidConfig(
                "transaction.log_location must be 'ram://' or a directory".to_string(),
            ));
        }
        if self.index.merge_factor < 2 {
            return Err(Error::InvalidConfig(
                "index.merge_factor must be at least 2".to_string(),
            ));
        }
        if self.index.max_concurrent_merges == 0 {
            return Err(Error::InvalidConfig(
                "index.max_concurrent_merges must be at least 1".to_string(),
            ));
        }
        if let PartitionScheme::Modulo { prefix, size } = &self.partitions {
            if *size == 0 || prefix.is_empty() {
                return Err(Error::InvalidConfig(
                    "partitions.modulo needs a prefix and a size of at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Vellum configuration

[transaction]
# read_committed | direct_writer | batch_insert | search_only
processor = "read_committed"
# "ram://" keeps overlay indexes in memory; a path stores them on disk
log_location = "ram://"
optimize_on_commit = true
concurrent_operations = true
concurrency_level = 5
# uid | subindex
hashing = "uid"
backlog = 100
add_timeout_ms = 10000
invalidate_cache_on_commit = true
maintain_order = true

[index]
lock_timeout_ms = 10000
lock_poll_interval_ms = 100
merge_factor = 10
max_concurrent_merges = 2
reader_refresh_interval_ms = 5000

[partitions]
# alias | modulo (modulo also needs prefix and size)
scheme = "alias"
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VellumConfig = toml::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }
}
