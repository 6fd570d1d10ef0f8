//! Identifier generation
//!
//! Overlay directories and transactions need process-unique names. The
//! generator is injected wherever names are minted so tests can use a
//! deterministic sequence.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique identifiers.
pub trait IdGenerator: Send + Sync + Debug {
    /// Next identifier; never repeats for the lifetime of the generator.
    fn next_id(&self) -> String;
}

/// Monotonic counter, rendered in decimal.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Start counting at `start`.
    pub fn starting_at(start: u64) -> Self {
        SequentialIds {
            next: AtomicU64::new(start),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

/// Random v4 UUIDs, safe across processes sharing a log directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}
