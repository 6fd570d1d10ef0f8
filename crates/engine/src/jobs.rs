//! Concurrent job processor
//!
//! Dirty operations are hash-partitioned over a fixed set of workers, each
//! owning a bounded FIFO. A worker's run loop is scheduled on the injected
//! [`TaskExecutor`] the first time a job is routed to it and exits after a
//! stop request once its queue is empty.
//!
//! ## Worker states
//!
//! ```text
//! Stopped --add_job--> Running --stop--> Draining --queue empty--> Stopped
//!                         |                                          ^
//!                         +------------- job failed -----------------+
//! ```
//!
//! A failed job records its error on the worker and discards the worker's
//! remaining queue. The error is handed to the next caller of
//! [`ConcurrentJobProcessor::wait_for_jobs`].

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vellum_core::{Error, Hashing, Result, TransactionConfig, TransactionJob};
use vellum_storage::TaskExecutor;
use xxhash_rust::xxh3::xxh3_64;

/// Applies one job; implemented by the processors.
pub trait JobApplier: Send + Sync {
    /// Apply `job` to the transaction's state.
    fn apply(&self, job: &TransactionJob) -> Result<()>;
}

/// Lifecycle of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No run loop scheduled.
    Stopped,
    /// Run loop active, accepting jobs.
    Running,
    /// Stop requested; finishing the queued jobs.
    Draining,
}

/// Job processor tuning.
#[derive(Debug, Clone, Copy)]
pub struct JobProcessorOptions {
    /// Number of workers.
    pub concurrency_level: usize,
    /// Queue capacity per worker.
    pub backlog: usize,
    /// How long `add_job` waits on a full queue.
    pub add_timeout: Duration,
    /// Routing key selection.
    pub hashing: Hashing,
    /// How often an idle worker wakes up to check for a stop request.
    pub poll_interval: Duration,
}

impl Default for JobProcessorOptions {
    fn default() -> Self {
        Self::from(&TransactionConfig::default())
    }
}

impl From<&TransactionConfig> for JobProcessorOptions {
    fn from(config: &TransactionConfig) -> Self {
        JobProcessorOptions {
            concurrency_level: config.concurrency_level.max(1),
            backlog: config.backlog.max(1),
            add_timeout: config.add_timeout(),
            hashing: config.hashing,
            poll_interval: Duration::from_millis(100),
        }
    }
}

struct WorkerQueue {
    jobs: VecDeque<TransactionJob>,
    state: WorkerState,
    stop_requested: bool,
    exception: Option<Error>,
    processed: u64,
}

struct Worker {
    index: usize,
    queue: Mutex<WorkerQueue>,
    not_empty: Condvar,
    not_full: Condvar,
    stopped: Condvar,
}

impl Worker {
    fn new(index: usize) -> Self {
        Worker {
            index,
            queue: Mutex::new(WorkerQueue {
                jobs: VecDeque::new(),
                state: WorkerState::Stopped,
                stop_requested: false,
                exception: None,
                processed: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            stopped: Condvar::new(),
        }
    }
}

/// Fixed pool of hash-routed job queues.
pub struct ConcurrentJobProcessor {
    options: JobProcessorOptions,
    applier: Arc<dyn JobApplier>,
    executor: Arc<dyn TaskExecutor>,
    workers: Vec<Arc<Worker>>,
}

impl std::fmt::Debug for ConcurrentJobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentJobProcessor")
            .field("options", &self.options)
            .field("pending", &self.pending())
            .finish()
    }
}

impl ConcurrentJobProcessor {
    /// Create a processor; no worker runs until a job is routed to it.
    pub fn new(
        options: JobProcessorOptions,
        applier: Arc<dyn JobApplier>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let workers = (0..options.concurrency_level.max(1))
            .map(|i| Arc::new(Worker::new(i)))
            .collect();
        ConcurrentJobProcessor {
            options,
            applier,
            executor,
            workers,
        }
    }

    /// Number of workers.
    pub fn concurrency_level(&self) -> usize {
        self.workers.len()
    }

    /// Worker a job is routed to.
    pub fn worker_for(&self, job: &TransactionJob) -> usize {
        let key = job.routing_key(self.options.hashing);
        (xxh3_64(key.as_bytes()) % self.workers.len() as u64) as usize
    }

    /// Enqueue a job on its worker, starting the worker if needed.
    ///
    /// # Errors
    ///
    /// * `BacklogTimeout` if the worker's queue stayed full for the add
    ///   timeout. The processor is unchanged and the call may be retried.
    /// * `InvalidState` if the worker already failed; the failure is
    ///   reported by [`ConcurrentJobProcessor::wait_for_jobs`].
    pub fn add_job(&self, job: TransactionJob) -> Result<()> {
        let index = self.worker_for(&job);
        let worker = &self.workers[index];
        let deadline = Instant::now() + self.options.add_timeout;

        let mut queue = worker.queue.lock();
        loop {
            if let Some(e) = queue.exception.as_ref() {
                return Err(Error::InvalidState {
                    expected: "healthy worker".to_string(),
                    actual: format!("worker {} failed: {}", index, e),
                });
            }
            if queue.jobs.len() < self.options.backlog {
                break;
            }
            if worker.not_full.wait_until(&mut queue, deadline).timed_out()
                && queue.jobs.len() >= self.options.backlog
            {
                debug!(target: "vellum::jobs", worker = index, job = %job, "Backlog full");
                return Err(Error::BacklogTimeout {
                    worker: index,
                    timeout: self.options.add_timeout,
                });
            }
        }

        if queue.state == WorkerState::Stopped {
            queue.state = WorkerState::Running;
            queue.stop_requested = false;
            let task_worker = Arc::clone(worker);
            let applier = Arc::clone(&self.applier);
            let poll = self.options.poll_interval;
            if let Err(e) = self
                .executor
                .execute(Box::new(move || run_worker(&task_worker, applier.as_ref(), poll)))
            {
                queue.state = WorkerState::Stopped;
                return Err(e);
            }
            debug!(target: "vellum::jobs", worker = index, "Started worker");
        }

        queue.jobs.push_back(job);
        worker.not_empty.notify_one();
        Ok(())
    }

    /// Ask every running worker to exit once its queue is empty.
    pub fn stop(&self) {
        for worker in &self.workers {
            let mut queue = worker.queue.lock();
            if queue.state == WorkerState::Running {
                queue.state = WorkerState::Draining;
                queue.stop_requested = true;
                worker.not_empty.notify_all();
            }
        }
    }

    /// Block until every worker's run loop has exited.
    pub fn wait_till_stopped(&self) {
        for worker in &self.workers {
            let mut queue = worker.queue.lock();
            while queue.state != WorkerState::Stopped {
                worker.stopped.wait(&mut queue);
            }
        }
    }

    /// Take the error recorded by `worker`, if any.
    pub fn take_exception(&self, worker: usize) -> Option<Error> {
        self.workers
            .get(worker)
            .and_then(|w| w.queue.lock().exception.take())
    }

    /// Stop, drain and wait for every worker.
    ///
    /// # Errors
    ///
    /// `JobExecution` wrapping the first recorded failure. Failures of other
    /// workers are logged and discarded.
    pub fn wait_for_jobs(&self) -> Result<()> {
        self.stop();
        self.wait_till_stopped();
        let mut first = None;
        for worker in &self.workers {
            if let Some(e) = worker.queue.lock().exception.take() {
                if first.is_none() {
                    first = Some(Error::job_execution(worker.index, e));
                } else {
                    warn!(target: "vellum::jobs", worker = worker.index, error = %e, "Additional worker failure");
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Discard every queued job without applying it.
    ///
    /// Jobs already being applied finish. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut discarded = 0;
        for worker in &self.workers {
            let mut queue = worker.queue.lock();
            discarded += queue.jobs.len();
            queue.jobs.clear();
            worker.not_full.notify_all();
        }
        if discarded > 0 {
            debug!(target: "vellum::jobs", discarded, "Cleared queued jobs");
        }
        discarded
    }

    /// Whether `worker` has no run loop and must be started again.
    pub fn needs_reschedule(&self, worker: usize) -> bool {
        self.worker_state(worker) == Some(WorkerState::Stopped)
    }

    /// Current state of `worker`.
    pub fn worker_state(&self, worker: usize) -> Option<WorkerState> {
        self.workers.get(worker).map(|w| w.queue.lock().state)
    }

    /// Jobs queued across all workers.
    pub fn pending(&self) -> usize {
        self.workers.iter().map(|w| w.queue.lock().jobs.len()).sum()
    }

    /// Jobs applied successfully across all workers.
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.queue.lock().processed).sum()
    }
}

impl Drop for ConcurrentJobProcessor {
    fn drop(&mut self) {
        self.clear();
        self.stop();
    }
}

fn run_worker(worker: &Worker, applier: &dyn JobApplier, poll: Duration) {
    loop {
        let job = {
            let mut queue = worker.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    worker.not_full.notify_one();
                    break job;
                }
                if queue.stop_requested || queue.state == WorkerState::Stopped {
                    queue.state = WorkerState::Stopped;
                    queue.stop_requested = false;
                    worker.stopped.notify_all();
                    return;
                }
                worker.not_empty.wait_for(&mut queue, poll);
            }
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| applier.apply(&job)))
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                Err(Error::InvalidOperation(format!("job {} panicked: {}", job, message)))
            });

        let mut queue = worker.queue.lock();
        match result {
            Ok(()) => queue.processed += 1,
            Err(e) => {
                let skipped = queue.jobs.len();
                warn!(
                    target: "vellum::jobs",
                    worker = worker.index,
                    job = %job,
                    skipped,
                    error = %e,
                    "Job failed, stopping worker"
                );
                queue.jobs.clear();
                queue.exception = Some(e);
                queue.state = WorkerState::Stopped;
                queue.stop_requested = false;
                worker.not_full.notify_all();
                worker.stopped.notify_all();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vellum_core::{PartitionScheme, Resource, ResourceKey};
    use vellum_storage::{SpawnExecutor, Task};

    /// Records the last value written per uid, in application order.
    #[derive(Default)]
    struct Recorder {
        last: Mutex<HashMap<String, String>>,
        applied: AtomicUsize,
        fail_on: Option<String>,
    }

    impl JobApplier for Recorder {
        fn apply(&self, job: &TransactionJob) -> Result<()> {
            if let TransactionJob::Create(resource) = job {
                let value = resource.value("n").unwrap_or_default().to_string();
                if self.fail_on.as_deref() == Some(value.as_str()) {
                    return Err(Error::InvalidOperation(format!("refusing {}", value)));
                }
                self.last
                    .lock()
                    .insert(resource.key().uid().to_string(), value);
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Holds tasks instead of running them.
    #[derive(Default)]
    struct PausedExecutor {
        held: Mutex<Vec<Task>>,
    }

    impl std::fmt::Debug for PausedExecutor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PausedExecutor")
                .field("held", &self.held.lock().len())
                .finish()
        }
    }

    impl TaskExecutor for PausedExecutor {
        fn execute(&self, task: Task) -> Result<()> {
            self.held.lock().push(task);
            Ok(())
        }
    }

    fn create(id: &str, n: usize) -> TransactionJob {
        let key = ResourceKey::single("Doc", id, &PartitionScheme::Alias);
        TransactionJob::Create(Arc::new(Resource::new(key).keyword("n", n.to_string())))
    }

    fn options(workers: usize, backlog: usize, timeout_ms: u64) -> JobProcessorOptions {
        JobProcessorOptions {
            concurrency_level: workers,
            backlog,
            add_timeout: Duration::from_millis(timeout_ms),
            hashing: Hashing::Uid,
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_same_uid_routes_to_same_worker() {
        let p = ConcurrentJobProcessor::new(
            options(5, 10, 100),
            Arc::new(Recorder::default()),
            Arc::new(PausedExecutor::default()),
        );
        for id in 0..20 {
            let id = id.to_string();
            assert_eq!(p.worker_for(&create(&id, 0)), p.worker_for(&create(&id, 1)));
        }
    }

    #[test]
    fn test_last_job_per_uid_wins() {
        let recorder = Arc::new(Recorder::default());
        let p = ConcurrentJobProcessor::new(
            options(5, 4, 5_000),
            recorder.clone(),
            Arc::new(SpawnExecutor::new("test-jobs")),
        );
        for n in 0..100 {
            p.add_job(create(&(n % 10).to_string(), n)).unwrap();
        }
        p.wait_for_jobs().unwrap();

        assert_eq!(recorder.applied.load(Ordering::SeqCst), 100);
        let last = recorder.last.lock();
        assert_eq!(last.len(), 10);
        for id in 0..10 {
            let key = ResourceKey::single("Doc", id.to_string(), &PartitionScheme::Alias);
            assert_eq!(last[key.uid()], (90 + id).to_string());
        }
        drop(last);
        assert_eq!(p.processed(), 100);
        assert!((0..5).all(|w| p.needs_reschedule(w)));
    }

    #[test]
    fn test_full_backlog_times_out() {
        let p = ConcurrentJobProcessor::new(
            options(1, 1, 50),
            Arc::new(Recorder::default()),
            Arc::new(PausedExecutor::default()),
        );
        p.add_job(create("1", 0)).unwrap();
        assert_eq!(p.worker_state(0), Some(WorkerState::Running));

        let started = Instant::now();
        let err = p.add_job(create("1", 1)).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(matches!(err, Error::BacklogTimeout { worker: 0, .. }));
        assert!(!err.requires_rollback());
        assert_eq!(p.pending(), 1);
    }

    #[test]
    fn test_failure_is_reported_once_and_skips_queue() {
        let recorder = Arc::new(Recorder {
            fail_on: Some("0".to_string()),
            ..Recorder::default()
        });
        let executor = Arc::new(PausedExecutor::default());
        let p = ConcurrentJobProcessor::new(options(1, 10, 100), recorder.clone(), executor.clone());
        p.add_job(create("1", 0)).unwrap();
        p.add_job(create("2", 1)).unwrap();
        p.add_job(create("3", 2)).unwrap();

        let task = executor.held.lock().pop().unwrap();
        task();

        assert_eq!(p.worker_state(0), Some(WorkerState::Stopped));
        assert_eq!(recorder.applied.load(Ordering::SeqCst), 0);
        assert!(matches!(p.add_job(create("4", 3)), Err(Error::InvalidState { .. })));

        let err = p.wait_for_jobs().unwrap_err();
        assert!(matches!(err, Error::JobExecution { worker: 0, .. }));
        p.wait_for_jobs().unwrap();
    }

    #[test]
    fn test_clear_discards_queued_jobs() {
        let recorder = Arc::new(Recorder::default());
        let executor = Arc::new(PausedExecutor::default());
        let p = ConcurrentJobProcessor::new(options(2, 10, 100), recorder.clone(), executor.clone());
        for n in 0..6 {
            p.add_job(create(&n.to_string(), n)).unwrap();
        }
        assert_eq!(p.clear(), 6);
        p.stop();
        for task in executor.held.lock().drain(..) {
            task();
        }
        p.wait_till_stopped();
        assert_eq!(recorder.applied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_worker_restarts_after_drain() {
        let recorder = Arc::new(Recorder::default());
        let p = ConcurrentJobProcessor::new(
            options(2, 10, 1_000),
            recorder.clone(),
            Arc::new(SpawnExecutor::new("test-restart")),
        );
        p.add_job(create("1", 0)).unwrap();
        p.wait_for_jobs().unwrap();
        p.add_job(create("1", 1)).unwrap();
        p.wait_for_jobs().unwrap();
        assert_eq!(recorder.applied.load(Ordering::SeqCst), 2);
    }
}
