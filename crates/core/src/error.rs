//! Error types for Vellum
//!
//! Every public operation of the transaction layer returns [`Result`]. The
//! variants follow the failure taxonomy of the transaction processors: storage
//! that cannot be opened, backlogs that do not drain in time, jobs that failed
//! on a worker and commits that stopped half way through the partitions.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Vellum operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the search engine and its transaction layer.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, directory listing, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (bad magic, checksum mismatch, ...).
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Overlay or main-store location cannot be created or opened.
    #[error("Failed to open storage at '{location}': {reason}")]
    StorageOpen {
        /// Location that failed to open.
        location: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Advisory lock could not be obtained in time.
    #[error("Timed out after {timeout:?} waiting for lock '{lock}'")]
    LockTimeout {
        /// Lock name, including its directory.
        lock: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// A job could not be enqueued before the add timeout elapsed.
    #[error("Backlog of worker {worker} stayed full for {timeout:?}")]
    BacklogTimeout {
        /// Worker slot the job was routed to.
        worker: usize,
        /// Configured add timeout.
        timeout: Duration,
    },

    /// A worker failed while applying a job.
    #[error("Job execution failed on worker {worker}: {source}")]
    JobExecution {
        /// Worker slot that recorded the failure.
        worker: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A partition failed during commit after others were already committed.
    #[error("Commit failed on partition '{partition}' (already committed: {committed:?}): {source}")]
    CommitPartialFailure {
        /// Partition that failed.
        partition: String,
        /// Partitions committed before the failure.
        committed: Vec<String>,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Operation issued in the wrong transaction state.
    #[error("Invalid transaction state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: String,
        /// Current state.
        actual: String,
    },

    /// Invalid operation or argument.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Operation not supported by the selected transaction processor.
    #[error("Operation '{operation}' is not supported by the {processor} processor")]
    Unsupported {
        /// Processor name.
        processor: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wrap an error raised on a worker thread.
    pub fn job_execution(worker: usize, source: Error) -> Self {
        Error::JobExecution {
            worker,
            source: Box::new(source),
        }
    }

    /// Build a storage-open error from any displayable cause.
    pub fn storage_open(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::StorageOpen {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the transaction that observed this error must be rolled back.
    ///
    /// A backlog timeout leaves the processor intact and may be retried;
    /// everything else is fatal to the transaction.
    pub fn requires_rollback(&self) -> bool {
        !matches!(self, Error::BacklogTimeout { .. } | Error::Unsupported { .. })
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
