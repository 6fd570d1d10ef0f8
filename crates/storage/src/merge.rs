//! Bounded merge scheduling
//!
//! Merges are queued per writer and dispatched to an injected
//! [`TaskExecutor`], never more than `max_concurrent` at a time. A merge
//! whose inputs changed while it ran reports [`MergeOutcome::Requeue`] and
//! goes to the back of the queue, up to a retry limit.

use crate::background::TaskExecutor;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_core::Result;

/// Result of one merge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged and installed.
    Done,
    /// Inputs changed concurrently; try again later.
    Requeue,
    /// Nothing left to do.
    Skipped,
}

/// A unit of merge work.
pub trait MergeTask: Send + Sync {
    /// Attempt the merge.
    fn run(&self) -> Result<MergeOutcome>;

    /// Called once if the task is dropped without reaching a final outcome.
    fn abandon(&self) {}

    /// Short description for logs.
    fn describe(&self) -> String;
}

struct Queued {
    task: Arc<dyn MergeTask>,
    attempts: u32,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Queued>,
    running: usize,
}

struct SchedulerInner {
    executor: Arc<dyn TaskExecutor>,
    max_concurrent: usize,
    max_requeues: u32,
    state: Mutex<SchedulerState>,
    idle: Condvar,
}

/// Queue of merges with a concurrency gate.
#[derive(Clone)]
pub struct MergeScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for MergeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MergeScheduler")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("queued", &state.queue.len())
            .field("running", &state.running)
            .finish()
    }
}

/// Decrements the running count and keeps the queue moving, even on panic.
struct RunningGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.running -= 1;
            if state.running == 0 && state.queue.is_empty() {
                self.inner.idle.notify_all();
            }
        }
        dispatch(&self.inner);
    }
}

impl MergeScheduler {
    /// Default retry limit for requeued merges.
    pub const DEFAULT_MAX_REQUEUES: u32 = 8;

    /// Create a scheduler running at most `max_concurrent` merges at once.
    pub fn new(executor: Arc<dyn TaskExecutor>, max_concurrent: usize) -> Self {
        MergeScheduler {
            inner: Arc::new(SchedulerInner {
                executor,
                max_concurrent: max_concurrent.max(1),
                max_requeues: Self::DEFAULT_MAX_REQUEUES,
                state: Mutex::new(SchedulerState::default()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Queue a merge and dispatch if a slot is free.
    pub fn submit(&self, task: Arc<dyn MergeTask>) {
        self.inner.state.lock().queue.push_back(Queued { task, attempts: 0 });
        dispatch(&self.inner);
    }

    /// Merges waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Merges currently executing.
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Block until nothing is queued or running.
    pub fn wait_idle(&self) {
        let mut state = self.inner.state.lock();
        while state.running > 0 || !state.queue.is_empty() {
            self.inner.idle.wait(&mut state);
        }
    }
}

fn dispatch(inner: &Arc<SchedulerInner>) {
    loop {
        let queued = {
            let mut state = inner.state.lock();
            if state.running >= inner.max_concurrent {
                return;
            }
            match state.queue.pop_front() {
                Some(queued) => {
                    state.running += 1;
                    queued
                }
                None => return,
            }
        };

        let task_inner = Arc::clone(inner);
        let description = queued.task.describe();
        let abandon = Arc::clone(&queued.task);
        let submitted = inner.executor.execute(Box::new(move || {
            let guard = RunningGuard { inner: task_inner };
            run_merge(&guard.inner, queued);
        }));

        if let Err(e) = submitted {
            warn!(target: "vellum::storage", merge = %description, error = %e, "Merge could not be dispatched");
            abandon.abandon();
            let mut state = inner.state.lock();
            state.running -= 1;
            if state.running == 0 && state.queue.is_empty() {
                inner.idle.notify_all();
            }
            return;
        }
    }
}

fn run_merge(inner: &SchedulerInner, queued: Queued) {
    match queued.task.run() {
        Ok(MergeOutcome::Done) => {
            debug!(target: "vellum::storage", merge = %queued.task.describe(), "Merge done");
        }
        Ok(MergeOutcome::Skipped) => {}
        Ok(MergeOutcome::Requeue) if queued.attempts < inner.max_requeues => {
            debug!(
                target: "vellum::storage",
                merge = %queued.task.describe(),
                attempts = queued.attempts + 1,
                "Merge inputs changed, requeueing"
            );
            inner.state.lock().queue.push_back(Queued {
                task: queued.task,
                attempts: queued.attempts + 1,
            });
        }
        Ok(MergeOutcome::Requeue) => {
            warn!(target: "vellum::storage", merge = %queued.task.describe(), "Merge gave up after repeated requeues");
            queued.task.abandon();
        }
        Err(e) => {
            warn!(target: "vellum::storage", merge = %queued.task.describe(), error = %e, "Merge failed");
            queued.task.abandon();
        }
    }
}
