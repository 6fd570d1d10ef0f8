//! Task executors for background work
//!
//! Job workers and segment merges never create threads themselves; they hand
//! closures to an injected [`TaskExecutor`]. Three executors are provided:
//!
//! - [`ThreadPoolExecutor`]: fixed pool of named threads over a bounded FIFO
//! - [`SpawnExecutor`]: one short-lived named thread per task
//! - [`InlineExecutor`]: runs the task on the caller's thread

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;
use vellum_core::{Error, Result};

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks, usually on another thread.
pub trait TaskExecutor: Send + Sync + Debug {
    /// Hand a task to the executor.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the executor is shut down or saturated.
    fn execute(&self, task: Task) -> Result<()>;
}

fn run_guarded(name: &str, task: Task) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
        error!(
            target: "vellum::storage",
            executor = name,
            "background task panicked: {:?}",
            e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
        );
    }
}

// ============================================================================
// ThreadPoolExecutor
// ============================================================================

/// Executor metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Tasks waiting in the queue.
    pub queue_depth: usize,
    /// Tasks currently running.
    pub active_tasks: usize,
    /// Tasks finished since creation, panicked ones included.
    pub tasks_completed: u64,
    /// Worker threads.
    pub worker_count: usize,
}

struct PoolInner {
    name: String,
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
}

/// Fixed pool of worker threads draining a bounded FIFO queue.
pub struct ThreadPoolExecutor {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("name", &self.inner.name)
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl ThreadPoolExecutor {
    /// Start `num_threads` workers named `<name>-0`, `<name>-1`, ...
    pub fn new(name: &str, num_threads: usize, max_queue_depth: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let inner = Arc::new(PoolInner {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
        });

        let pool = ThreadPoolExecutor {
            inner: Arc::clone(&inner),
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || worker_loop(&inner_clone))?;
            pool.workers.lock().push(handle);
        }
        Ok(pool)
    }

    /// Block until the queue is empty and no task is running.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_tasks.load(Ordering::Acquire) > 0 {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop accepting tasks, run what is queued and join the workers.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            // Notify under the queue lock so no worker misses the wakeup
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Snapshot of pool metrics.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            queue_depth: self.inner.queue.lock().len(),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl TaskExecutor for ThreadPoolExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::InvalidOperation(format!(
                "executor {} is shut down",
                self.inner.name
            )));
        }
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                return Err(Error::InvalidOperation(format!(
                    "executor {} queue is full",
                    self.inner.name
                )));
            }
            queue.push_back(task);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` and wakes drain waiters, even if the task panics.
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if prev_active == 1 {
            let queue = self.inner.queue.lock();
            if queue.is_empty() {
                self.inner.drain_cond.notify_all();
            }
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };
        run_guarded(&inner.name, task);
    }
}

// ============================================================================
// SpawnExecutor / InlineExecutor
// ============================================================================

/// Spawns a detached named thread for every task.
///
/// Suited to long-lived tasks such as job workers, where a bounded pool
/// could be starved by workers of other transactions.
#[derive(Debug)]
pub struct SpawnExecutor {
    name: String,
    spawned: AtomicU64,
}

impl SpawnExecutor {
    /// Create an executor whose threads are named `<name>-<n>`.
    pub fn new(name: impl Into<String>) -> Self {
        SpawnExecutor {
            name: name.into(),
            spawned: AtomicU64::new(0),
        }
    }
}

impl TaskExecutor for SpawnExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = self.name.clone();
        std::thread::Builder::new()
            .name(format!("{}-{}", self.name, n))
            .spawn(move || run_guarded(&name, task))?;
        Ok(())
    }
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        run_guarded("inline", task);
        Ok(())
    }
}
