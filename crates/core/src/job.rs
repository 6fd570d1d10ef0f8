//! Transaction jobs
//!
//! Every dirty operation issued against a transaction becomes a
//! [`TransactionJob`]. Jobs are immutable once built and are consumed exactly
//! once, either inline on the calling thread or by a worker of the concurrent
//! job processor.

use crate::query::Query;
use crate::resource::{Resource, ResourceKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a transaction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Add a new resource.
    Create,
    /// Replace an existing resource.
    Update,
    /// Remove a resource by key.
    Delete,
    /// Remove every resource matching a query in one partition.
    DeleteByQuery,
    /// Make a partition's pending changes visible without ending the transaction.
    FlushCommit,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Create => "create",
            JobKind::Update => "update",
            JobKind::Delete => "delete",
            JobKind::DeleteByQuery => "delete_by_query",
            JobKind::FlushCommit => "flush_commit",
        };
        f.write_str(name)
    }
}

/// Which value a job is routed on when dispatched to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hashing {
    /// Route by resource UID (partition-level jobs fall back to the partition).
    Uid,
    /// Route by partition name.
    #[serde(rename = "subindex")]
    Partition,
}

/// A pending dirty operation.
#[derive(Debug, Clone)]
pub enum TransactionJob {
    /// Add a new resource.
    Create(Arc<Resource>),
    /// Replace an existing resource.
    Update(Arc<Resource>),
    /// Remove a resource.
    Delete(ResourceKey),
    /// Remove all matches of `query` in `partition`.
    DeleteByQuery {
        /// Target partition.
        partition: String,
        /// Matching query.
        query: Arc<Query>,
    },
    /// Merge and publish a partition's pending changes.
    FlushCommit {
        /// Target partition.
        partition: String,
    },
}

impl TransactionJob {
    /// Job kind.
    pub fn kind(&self) -> JobKind {
        match self {
            TransactionJob::Create(_) => JobKind::Create,
            TransactionJob::Update(_) => JobKind::Update,
            TransactionJob::Delete(_) => JobKind::Delete,
            TransactionJob::DeleteByQuery { .. } => JobKind::DeleteByQuery,
            TransactionJob::FlushCommit { .. } => JobKind::FlushCommit,
        }
    }

    /// Partition this job touches.
    pub fn partition(&self) -> &str {
        match self {
            TransactionJob::Create(r) | TransactionJob::Update(r) => r.key().partition(),
            TransactionJob::Delete(k) => k.partition(),
            TransactionJob::DeleteByQuery { partition, .. }
            | TransactionJob::FlushCommit { partition } => partition,
        }
    }

    /// Resource key, for jobs that target a single resource.
    pub fn key(&self) -> Option<&ResourceKey> {
        match self {
            TransactionJob::Create(r) | TransactionJob::Update(r) => Some(r.key()),
            TransactionJob::Delete(k) => Some(k),
            TransactionJob::DeleteByQuery { .. } | TransactionJob::FlushCommit { .. } => None,
        }
    }

    /// Resource UID, for jobs that target a single resource.
    pub fn uid(&self) -> Option<&str> {
        self.key().map(ResourceKey::uid)
    }

    /// Routing key under the given hashing mode.
    ///
    /// Partition-wide jobs always route on the partition. Under UID hashing
    /// that orders them only against other partition-wide jobs of the same
    /// partition, so callers drain queued jobs before issuing them.
    pub fn routing_key(&self, hashing: Hashing) -> &str {
        match (hashing, self.uid()) {
            (Hashing::Uid, Some(uid)) => uid,
            _ => self.partition(),
        }
    }
}

impl fmt::Display for TransactionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uid() {
            Some(uid) => write!(f, "{} {}", self.kind(), uid),
            None => write!(f, "{} [{}]", self.kind(), self.partition()),
        }
    }
}
