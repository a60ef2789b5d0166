//! Worker pool with dedicated OS threads.
//!
//! Each worker owns a single-threaded tokio runtime and blocks on a bounded
//! crossbeam channel, so CPU-bound or blocking units of work never starve
//! the caller's async runtime.
//!
//! # Design
//!
//! - **No polling**: workers block on channel recv; result waiters block on a
//!   per-slot `Condvar`.
//! - **Detach on timeout**: a waiter that gives up can [`discard`] its slot;
//!   the worker's eventual result then has nowhere to go and is dropped.
//! - **Draining shutdown**: dropping the sender lets workers finish whatever
//!   is already queued before their `recv` fails.
//!
//! [`discard`]: WorkerPool::discard

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use futures::FutureExt;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::core::task::TaskFault;
use crate::util::serde::ExecutionId;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The task queue is full; no more tasks can be accepted.
    QueueFull,

    /// The wait for a result timed out.
    Timeout,

    /// No result slot exists for the key.
    ResultNotFound,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (worker thread panic, spawn failure, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "task queue is full"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::ResultNotFound => write!(f, "result not found"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Metadata handed to the worker alongside each payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMeta {
    /// Execution the payload belongs to; doubles as the result slot key.
    pub execution_id: ExecutionId,
    /// Task class, for logging.
    pub task_class: String,
    /// Submission time in milliseconds since epoch.
    pub submitted_at_ms: u128,
}

/// Runs payloads on worker threads.
///
/// Called from a dedicated worker thread inside that worker's own
/// single-threaded tokio runtime.
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Execute a payload and return its result.
    async fn execute(&self, payload: P, meta: WorkMeta) -> R;
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Currently executing tasks.
    pub active_tasks: u64,

    /// Tasks waiting in the queue.
    pub queued_tasks: u64,

    /// Tasks whose executor returned.
    pub completed_tasks: u64,

    /// Tasks whose executor panicked.
    pub failed_tasks: u64,

    /// Total tasks accepted.
    pub submitted_tasks: u64,

    /// Results dropped because nobody was waiting any more.
    pub discarded_results: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct PoolCounters {
    active_tasks: AtomicU64,
    queued_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    submitted_tasks: AtomicU64,
    discarded_results: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            discarded_results: self.discarded_results.load(Ordering::Relaxed),
        }
    }
}

/// A task submitted to the worker pool.
struct WorkerTask<P> {
    payload: P,
    meta: WorkMeta,
}

/// Result slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Waiting for result.
    Pending,
    /// Result is ready.
    Ready,
    /// The executor panicked; no result will arrive.
    Abandoned,
}

struct ResultEntry<R> {
    result: Option<R>,
    state: SlotState,
    fault: Option<TaskFault>,
}

type Slot<R> = Arc<(Mutex<ResultEntry<R>>, Condvar)>;

/// Result storage using a `Condvar` per slot.
///
/// `RwLock` for the slot map (read-heavy), per-slot `Mutex` + `Condvar` for
/// waiting.
struct ResultStorage<R> {
    entries: RwLock<HashMap<ExecutionId, Slot<R>>>,
}

impl<R> ResultStorage<R> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn create_slot(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return false;
        }
        let entry = ResultEntry {
            result: None,
            state: SlotState::Pending,
            fault: None,
        };
        entries.insert(key.to_string(), Arc::new((Mutex::new(entry), Condvar::new())));
        true
    }

    fn get(&self, key: &str) -> Option<Slot<R>> {
        self.entries.read().get(key).cloned()
    }

    /// Store a result and wake waiters. Returns `false` if the slot is gone.
    fn store(&self, key: &str, result: R) -> bool {
        let Some(slot) = self.get(key) else {
            return false;
        };
        let (entry_mutex, condvar) = slot.as_ref();
        let mut entry = entry_mutex.lock();
        entry.result = Some(result);
        entry.state = SlotState::Ready;
        condvar.notify_all();
        true
    }

    fn abandon(&self, key: &str, fault: TaskFault) {
        if let Some(slot) = self.get(key) {
            let (entry_mutex, condvar) = slot.as_ref();
            let mut entry = entry_mutex.lock();
            entry.state = SlotState::Abandoned;
            entry.fault = Some(fault);
            condvar.notify_all();
        }
    }

    /// Wait until the slot resolves or the deadline passes.
    ///
    /// The slot is removed when a result (or abandonment) is observed and
    /// left in place on timeout.
    fn wait_for_result(&self, key: &str, timeout: Duration) -> Result<R, PoolError> {
        let slot = self.get(key).ok_or(PoolError::ResultNotFound)?;
        let deadline = Instant::now() + timeout;

        let (entry_mutex, condvar) = slot.as_ref();
        let mut entry = entry_mutex.lock();
        loop {
            match entry.state {
                SlotState::Ready => {
                    let result = entry.result.take();
                    drop(entry);
                    self.remove(key);
                    return result.ok_or(PoolError::ResultNotFound);
                }
                SlotState::Abandoned => {
                    let fault = entry.fault.take();
                    drop(entry);
                    self.remove(key);
                    return Err(PoolError::Internal(
                        fault.map_or_else(|| "worker abandoned task".to_string(), |f| f.to_string()),
                    ));
                }
                SlotState::Pending => {
                    if condvar.wait_until(&mut entry, deadline).timed_out()
                        && entry.state == SlotState::Pending
                    {
                        return Err(PoolError::Timeout);
                    }
                }
            }
        }
    }

    /// Remove a slot, returning its result if one had arrived.
    fn remove(&self, key: &str) -> Option<R> {
        let slot = self.entries.write().remove(key)?;
        let (entry_mutex, _) = slot.as_ref();
        let mut entry = entry_mutex.lock();
        entry.result.take()
    }
}

/// Worker pool with dedicated OS threads.
pub struct WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    worker_count: usize,

    /// Task sender. `None` once shut down.
    task_tx: Mutex<Option<Sender<WorkerTask<P>>>>,

    results: Arc<ResultStorage<R>>,

    counters: Arc<PoolCounters>,

    shutdown: AtomicBool,

    workers: Mutex<Vec<JoinHandle<()>>>,

    _executor: std::marker::PhantomData<E>,
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Spawn `config.worker_count` worker threads running `executor`.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` for invalid configuration and
    /// `PoolError::Internal` if a worker thread cannot be spawned.
    pub fn new(config: &ExecutorConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = bounded::<WorkerTask<P>>(config.max_queue_depth);
        let results = Arc::new(ResultStorage::new());
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let spawned = spawn_worker(
                worker_id,
                task_rx.clone(),
                Arc::clone(&results),
                Arc::clone(&counters),
                executor.clone(),
                config.thread_stack_size,
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Dropping the sender lets the workers spawned so far exit.
                    drop(task_tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(Self {
            worker_count: config.worker_count,
            task_tx: Mutex::new(Some(task_tx)),
            results,
            counters,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
            _executor: std::marker::PhantomData,
        })
    }

    /// Enqueue a payload without blocking.
    ///
    /// The result slot is keyed by `meta.execution_id`.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the task queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    /// - `PoolError::Internal` if a slot with the same key is pending
    pub fn submit(&self, payload: P, meta: WorkMeta) -> Result<ExecutionId, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::PoolShutdown);
        }

        let key = meta.execution_id.clone();
        if !self.results.create_slot(&key) {
            return Err(PoolError::Internal(format!("result slot `{key}` already pending")));
        }

        let task_tx_guard = self.task_tx.lock();
        let Some(task_tx) = task_tx_guard.as_ref() else {
            self.results.remove(&key);
            return Err(PoolError::PoolShutdown);
        };

        // Count before the send so a fast worker never decrements first.
        self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
        match task_tx.try_send(WorkerTask { payload, meta }) {
            Ok(()) => {
                self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
                debug!(execution_id = %key, "task submitted to worker pool");
                Ok(key)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                self.results.remove(&key);
                warn!(execution_id = %key, "worker pool queue is full");
                Err(PoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                self.results.remove(&key);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Block until the result for `key` arrives or `timeout` passes.
    ///
    /// On success the slot is consumed. On `PoolError::Timeout` the slot is
    /// kept so the caller can still [`discard`](Self::discard) it or pick up
    /// a result that raced the deadline.
    ///
    /// # Errors
    ///
    /// - `PoolError::Timeout` if no result arrived in time
    /// - `PoolError::ResultNotFound` if the key is unknown
    /// - `PoolError::Internal` if the executor panicked
    pub fn retrieve(&self, key: &str, timeout: Duration) -> Result<R, PoolError> {
        self.results.wait_for_result(key, timeout)
    }

    /// Drop the slot for `key`, returning a result that already arrived.
    ///
    /// A result stored after this call is discarded by the worker.
    pub fn discard(&self, key: &str) -> Option<R> {
        self.results.remove(key)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work.
    ///
    /// Workers finish everything already queued. With `wait`, this blocks
    /// until every worker has exited; otherwise they drain in the background.
    pub fn shutdown(&self, wait: bool) {
        if self.shutdown.swap(true, Ordering::AcqRel) && !wait {
            return;
        }

        info!(wait, "shutting down worker pool");
        self.task_tx.lock().take();

        if !wait {
            return;
        }

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let worker_count = handles.len();
        for (idx, worker) in handles.into_iter().enumerate() {
            if worker.join().is_ok() {
                debug!(worker_id = idx, "worker joined");
            } else {
                warn!(worker_id = idx, "worker panicked");
            }
        }
        info!(worker_count, "worker pool shut down complete");
    }
}

impl<P, R, E> Drop for WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    fn drop(&mut self) {
        // Signal shutdown but don't join; explicit shutdown(true) is required
        // for a graceful drain.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.task_tx.lock().take();
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

fn spawn_worker<P, R, E>(
    worker_id: usize,
    task_rx: Receiver<WorkerTask<P>>,
    results: Arc<ResultStorage<R>>,
    counters: Arc<PoolCounters>,
    executor: E,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    thread::Builder::new()
        .name(format!("tg-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            // recv() keeps yielding queued tasks after the sender is dropped
            // and only fails once the queue is empty.
            while let Ok(task) = task_rx.recv() {
                counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                counters.active_tasks.fetch_add(1, Ordering::Relaxed);

                let key = task.meta.execution_id.clone();
                debug!(worker_id, execution_id = %key, task_class = %task.meta.task_class, "worker executing task");

                let run = AssertUnwindSafe(executor.execute(task.payload, task.meta)).catch_unwind();
                match rt.block_on(run) {
                    Ok(result) => {
                        if !results.store(&key, result) {
                            counters.discarded_results.fetch_add(1, Ordering::Relaxed);
                            debug!(worker_id, execution_id = %key, "no waiter left, result discarded");
                        }
                        counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(panic) => {
                        let fault = TaskFault::from_panic(panic.as_ref());
                        error!(worker_id, execution_id = %key, error = %fault, "executor panicked");
                        results.abandon(&key, fault);
                        counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                    }
                }

                counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
            }

            debug!(worker_id, "worker thread exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::now_ms;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct EchoExecutor {
        execution_count: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl WorkerExecutor<String, String> for EchoExecutor {
        async fn execute(&self, payload: String, _meta: WorkMeta) -> String {
            self.execution_count.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(self.delay).await;
            assert!(payload != "panic", "asked to panic");
            format!("Result: {payload}")
        }
    }

    fn make_meta(id: &str) -> WorkMeta {
        WorkMeta {
            execution_id: id.to_string(),
            task_class: "test".into(),
            submitted_at_ms: now_ms(),
        }
    }

    fn make_pool(workers: usize, depth: usize, delay_ms: u64) -> (WorkerPool<String, String, EchoExecutor>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let executor = EchoExecutor {
            execution_count: Arc::clone(&count),
            delay: Duration::from_millis(delay_ms),
        };
        let config = ExecutorConfig::new()
            .with_worker_count(workers)
            .with_max_queue_depth(depth);
        (WorkerPool::new(&config, executor).unwrap(), count)
    }

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::QueueFull.to_string(), "task queue is full");
        assert_eq!(PoolError::Timeout.to_string(), "operation timed out");
        assert_eq!(
            PoolError::InvalidConfig("x".into()).to_string(),
            "invalid configuration: x"
        );
    }

    #[test]
    fn test_submit_and_retrieve() {
        let (pool, count) = make_pool(2, 10, 10);
        let key = pool.submit("hello".into(), make_meta("k1")).unwrap();
        let result = pool.retrieve(&key, Duration::from_secs(5)).unwrap();
        assert_eq!(result, "Result: hello");
        assert_eq!(count.load(Ordering::Relaxed), 1);

        pool.shutdown(true);
        let stats = pool.stats();
        assert_eq!(stats.submitted_tasks, 1);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.queued_tasks, 0);
    }

    #[test]
    fn test_timeout_then_discard_drops_late_result() {
        let (pool, _) = make_pool(1, 10, 200);
        let key = pool.submit("slow".into(), make_meta("k1")).unwrap();
        assert_eq!(pool.retrieve(&key, Duration::from_millis(20)), Err(PoolError::Timeout));
        assert!(pool.discard(&key).is_none());

        pool.shutdown(true);
        assert_eq!(pool.stats().discarded_results, 1);
    }

    #[test]
    fn test_queue_full() {
        let (pool, _) = make_pool(1, 1, 200);
        pool.submit("a".into(), make_meta("a")).unwrap();
        // Give the worker time to take `a` off the queue.
        thread::sleep(Duration::from_millis(50));
        pool.submit("b".into(), make_meta("b")).unwrap();
        assert_eq!(pool.submit("c".into(), make_meta("c")), Err(PoolError::QueueFull));
        pool.shutdown(true);
    }

    #[test]
    fn test_executor_panic_abandons_slot() {
        let (pool, _) = make_pool(1, 10, 0);
        let key = pool.submit("panic".into(), make_meta("p")).unwrap();
        let err = pool.retrieve(&key, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, PoolError::Internal(_)));

        // The worker survives the panic.
        let key = pool.submit("after".into(), make_meta("q")).unwrap();
        assert_eq!(pool.retrieve(&key, Duration::from_secs(5)).unwrap(), "Result: after");
        pool.shutdown(true);
        assert_eq!(pool.stats().failed_tasks, 1);
    }

    #[test]
    fn test_shutdown_drains_queue_and_rejects_new_work() {
        let (pool, count) = make_pool(1, 10, 20);
        for i in 0..4 {
            pool.submit(format!("t{i}"), make_meta(&format!("t{i}"))).unwrap();
        }
        pool.shutdown(true);
        assert_eq!(count.load(Ordering::Relaxed), 4);
        assert_eq!(
            pool.submit("late".into(), make_meta("late")),
            Err(PoolError::PoolShutdown)
        );
    }
}
