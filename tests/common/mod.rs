//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vellum::{PartitionScheme, Resource, ResourceKey, SearchEngine, VellumConfig};
use vellum_storage::{Task, TaskExecutor};

/// Alias used by most tests.
pub const ALIAS: &str = "Doc";

/// Configuration with reader caching disabled so commits are seen at once.
pub fn test_config() -> VellumConfig {
    let mut config = VellumConfig::default();
    config.index.reader_refresh_interval_ms = 0;
    config.index.lock_timeout_ms = 2_000;
    config.index.lock_poll_interval_ms = 10;
    config
}

/// In-memory engine with [`test_config`].
pub fn engine() -> SearchEngine {
    SearchEngine::in_memory(test_config()).expect("in-memory engine")
}

/// In-memory engine with a caller-tuned configuration.
pub fn engine_with(tune: impl FnOnce(&mut VellumConfig)) -> SearchEngine {
    let mut config = test_config();
    tune(&mut config);
    SearchEngine::in_memory(config).expect("in-memory engine")
}

/// Disk-backed engine rooted in a temp dir; overlays also live on disk.
pub struct DiskEngine {
    pub engine: SearchEngine,
    pub overlays: std::path::PathBuf,
    dir: TempDir,
}

impl DiskEngine {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let overlays = dir.path().join("overlays");
        let mut config = test_config();
        config.transaction.log_location = overlays.display().to_string();
        let engine = SearchEngine::open(dir.path().join("index"), config).expect("disk engine");
        DiskEngine {
            engine,
            overlays,
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Key under [`ALIAS`] with the alias partition scheme.
pub fn key(id: &str) -> ResourceKey {
    ResourceKey::single(ALIAS, id, &PartitionScheme::Alias)
}

/// Resource with a searchable `body`.
pub fn doc(id: &str, body: &str) -> Resource {
    Resource::new(key(id)).text("body", body)
}

/// UIDs of the hits, sorted.
pub fn ids(hits: &[vellum::Hit]) -> Vec<String> {
    let mut out: Vec<String> = hits
        .iter()
        .filter_map(|h| Resource::from_document(&h.document, &PartitionScheme::Alias))
        .filter_map(|r| r.key().ids().first().map(|p| p.value.clone()))
        .collect();
    out.sort();
    out
}

/// Executor that holds tasks until released, then runs them on threads.
///
/// Lets tests fill a worker backlog deterministically: jobs queue up while
/// the worker's run loop is parked here.
#[derive(Debug, Default)]
pub struct GatedExecutor {
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    open: bool,
    held: Vec<Task>,
}

impl std::fmt::Debug for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateState")
            .field("open", &self.open)
            .field("held", &self.held.len())
            .finish()
    }
}

impl GatedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tasks waiting for [`GatedExecutor::release`].
    pub fn held(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Run every held task and let later tasks through directly.
    pub fn release(&self) {
        let held = {
            let mut state = self.state.lock();
            state.open = true;
            std::mem::take(&mut state.held)
        };
        for task in held {
            std::thread::spawn(task);
        }
    }
}

impl TaskExecutor for GatedExecutor {
    fn execute(&self, task: Task) -> vellum::Result<()> {
        let mut state = self.state.lock();
        if state.open {
            drop(state);
            std::thread::spawn(task);
        } else {
            state.held.push(task);
        }
        Ok(())
    }
}

/// Executor that runs each task on its own thread after a fixed delay.
///
/// Keeps worker loops parked long enough for later submissions to race
/// ahead of queued jobs.
#[derive(Debug)]
pub struct DelayedExecutor {
    delay: Duration,
}

impl DelayedExecutor {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(DelayedExecutor { delay })
    }
}

impl TaskExecutor for DelayedExecutor {
    fn execute(&self, task: Task) -> vellum::Result<()> {
        let delay = self.delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            task();
        });
        Ok(())
    }
}
