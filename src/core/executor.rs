//! Concurrency-bounded task executor.
//!
//! `execute` records the execution in the ledger, takes a permit from the
//! admission gate, hands the unit of work to the worker pool, and waits up to
//! the timeout for its outcome. The ledger stays authoritative throughout:
//! whichever terminal transition lands first (worker completion, timeout, or
//! explicit cancellation) is what the caller is told.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::core::error::SubmissionError;
use crate::core::gate::AdmissionGate;
use crate::core::hooks::{HookContext, HookRegistry, PostHook, PreHook};
use crate::core::ledger::ExecutionLedger;
use crate::core::record::{Completion, ExecutionRecord, ExecutionStatus};
use crate::core::task::{Outcome, TaskFault, TaskRequest, TaskResult, WorkUnit};
use crate::core::worker_pool::{PoolError, PoolStats, WorkMeta, WorkerExecutor, WorkerPool};
use crate::util::clock::now_ms;
use crate::util::serde::{generate_id, ExecutionId, Scope};

/// How long a caller that lost the deadline race waits for the winner's
/// result to land in its slot.
const LATE_RESULT_GRACE: Duration = Duration::from_millis(250);

/// Longest result summary stored on a record.
const SUMMARY_LIMIT: usize = 256;

/// Payload shipped to a worker thread.
pub struct WorkOrder {
    work: Arc<dyn WorkUnit>,
    scope: Scope,
    input: Value,
}

/// Worker-side driver: moves the record to `Running`, runs hooks and the unit
/// of work with panic capture, then applies the terminal transition.
#[derive(Clone)]
pub struct LedgerRunner {
    ledger: Arc<ExecutionLedger>,
    hooks: Arc<HookRegistry>,
}

#[async_trait]
impl WorkerExecutor<WorkOrder, Outcome> for LedgerRunner {
    async fn execute(&self, order: WorkOrder, meta: WorkMeta) -> Outcome {
        let worker = thread::current().name().unwrap_or("worker").to_string();
        let mut running = Map::new();
        running.insert("worker".into(), Value::String(worker));
        if !self
            .ledger
            .update_status(&meta.execution_id, ExecutionStatus::Running, running)
        {
            debug!(execution_id = %meta.execution_id, "execution no longer active, skipping");
            return Outcome::Skipped;
        }

        let ctx = HookContext {
            execution_id: &meta.execution_id,
            task_class: &meta.task_class,
            scope: &order.scope,
            input: &order.input,
        };
        self.hooks.run_pre(&ctx);

        let run = order.work.run(order.input.clone(), order.scope.clone());
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(fault)) => Outcome::Fault(fault),
            Err(panic) => Outcome::Fault(TaskFault::from_panic(panic.as_ref())),
        };

        self.hooks.run_post(&ctx, &outcome);

        let completion = match &outcome {
            Outcome::Success(value) => Completion::succeeded(Some(summarize(value))),
            Outcome::Fault(fault) => {
                warn!(
                    execution_id = %meta.execution_id,
                    task_class = %meta.task_class,
                    category = %fault.category,
                    error = %fault.message,
                    "unit of work faulted"
                );
                Completion::failed(fault.clone())
            }
            Outcome::Skipped => return outcome,
        };
        self.ledger.complete(&meta.execution_id, completion);
        outcome
    }
}

/// Snapshot of executor load for ops tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    /// Worker pool counters.
    pub pool: PoolStats,
    /// Admission gate capacity.
    pub gate_capacity: usize,
    /// Permits currently held.
    pub gate_in_flight: usize,
    /// Non-terminal executions in the ledger.
    pub active_executions: usize,
    /// Whether new submissions are accepted.
    pub accepting: bool,
}

/// Runs units of work under a concurrency ceiling and per-task timeouts.
pub struct TaskExecutor {
    config: ExecutorConfig,
    ledger: Arc<ExecutionLedger>,
    hooks: Arc<HookRegistry>,
    gate: AdmissionGate,
    pool: WorkerPool<WorkOrder, Outcome, LedgerRunner>,
    accepting: AtomicBool,
}

impl TaskExecutor {
    /// Start the worker pool and gate described by `config`.
    ///
    /// # Errors
    ///
    /// Propagates pool construction failures.
    pub fn new(config: ExecutorConfig, ledger: Arc<ExecutionLedger>) -> Result<Self, PoolError> {
        let hooks = Arc::new(HookRegistry::new());
        let runner = LedgerRunner {
            ledger: Arc::clone(&ledger),
            hooks: Arc::clone(&hooks),
        };
        let pool = WorkerPool::new(&config, runner)?;
        info!(
            worker_count = config.worker_count,
            max_in_flight = config.max_in_flight,
            default_timeout_secs = config.default_timeout_secs,
            "task executor started"
        );
        Ok(Self {
            gate: AdmissionGate::new(config.max_in_flight),
            config,
            ledger,
            hooks,
            pool,
            accepting: AtomicBool::new(true),
        })
    }

    /// The ledger this executor drives.
    pub const fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }

    /// Executor configuration.
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Register a hook run before every unit of work.
    pub fn add_pre_hook(&self, hook: PreHook) {
        self.hooks.add_pre(hook);
    }

    /// Register a hook run after every unit of work.
    pub fn add_post_hook(&self, hook: PostHook) {
        self.hooks.add_post(hook);
    }

    /// Run one unit of work and block until it finishes or times out.
    ///
    /// Never panics on behalf of the unit of work: faults come back as a
    /// failed result, timeouts as a `TimedOut` result, and submission
    /// problems as a synthetic failed result.
    pub fn execute(&self, request: TaskRequest) -> TaskResult {
        let execution_id = request
            .execution_id
            .clone()
            .unwrap_or_else(|| generate_id("exec"));

        if let Err(e) = request.validate() {
            warn!(execution_id = %execution_id, error = %e, "rejected invalid task");
            return TaskResult::rejected(execution_id, &e);
        }
        if !self.accepting.load(Ordering::Acquire) {
            return TaskResult::rejected(execution_id, &SubmissionError::Shutdown);
        }

        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        let TaskRequest {
            task_class,
            scope,
            input,
            work,
            ..
        } = request;

        if let Err(e) = self
            .ledger
            .start(&execution_id, &task_class, scope.clone(), input.clone())
        {
            warn!(execution_id = %execution_id, error = %e, "rejected task");
            return TaskResult::rejected(execution_id, &e);
        }

        let permit = match self.gate.acquire() {
            Ok(permit) => permit,
            Err(e) => return self.reject_recorded(&execution_id, &e),
        };

        let meta = WorkMeta {
            execution_id: execution_id.clone(),
            task_class,
            submitted_at_ms: now_ms(),
        };
        if let Err(e) = self.pool.submit(WorkOrder { work, scope, input }, meta) {
            let err = match e {
                PoolError::QueueFull => SubmissionError::QueueFull(e.to_string()),
                PoolError::PoolShutdown => SubmissionError::Shutdown,
                other => SubmissionError::Unavailable(other.to_string()),
            };
            return self.reject_recorded(&execution_id, &err);
        }

        let result = match self.pool.retrieve(&execution_id, timeout) {
            Ok(outcome) => self.build_result(&execution_id, Some(outcome)),
            Err(PoolError::Timeout) => self.on_deadline(&execution_id, timeout),
            Err(e) => {
                let fault = TaskFault::new("internal", e.to_string());
                error!(execution_id = %execution_id, error = %e, "worker lost execution");
                self.ledger
                    .complete(&execution_id, Completion::failed(fault.clone()));
                self.build_result(&execution_id, Some(Outcome::Fault(fault)))
            }
        };
        drop(permit);
        result
    }

    /// Run many units of work, at most `max_concurrent` at a time, and return
    /// their results in input order.
    ///
    /// `max_concurrent` sets the number of driver threads, each running one
    /// request at a time through [`execute`](Self::execute) and so through
    /// the admission gate. It only tightens the executor's own ceiling; it
    /// never raises it. A request that cannot be driven yields a synthetic failed
    /// result rather than aborting the batch.
    pub fn execute_batch(&self, requests: Vec<TaskRequest>, max_concurrent: usize) -> Vec<TaskResult> {
        let total = requests.len();
        if total == 0 {
            return Vec::new();
        }
        let drivers = max_concurrent.clamp(1, total);

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ids: Vec<ExecutionId> = Vec::with_capacity(total);
        for (index, mut request) in requests.into_iter().enumerate() {
            let id = request
                .execution_id
                .get_or_insert_with(|| generate_id("exec"))
                .clone();
            ids.push(id);
            // The receiver is alive, so the send cannot fail.
            let _ = tx.send((index, request));
        }
        drop(tx);

        let mut results: Vec<Option<TaskResult>> = (0..total).map(|_| None).collect();
        thread::scope(|s| {
            let mut handles = Vec::with_capacity(drivers);
            for driver in 0..drivers {
                let rx = rx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("tg-batch-{driver}"))
                    .spawn_scoped(s, move || {
                        let mut done = Vec::new();
                        while let Ok((index, request)) = rx.recv() {
                            done.push((index, self.execute(request)));
                        }
                        done
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => warn!(driver, error = %e, "failed to spawn batch driver"),
                }
            }
            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (index, result) in done {
                            results[index] = Some(result);
                        }
                    }
                    Err(_) => error!("batch driver panicked"),
                }
            }
        });

        let results: Vec<TaskResult> = results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| {
                result.unwrap_or_else(|| {
                    TaskResult::rejected(
                        id,
                        &SubmissionError::Unavailable("batch driver unavailable".into()),
                    )
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(total, succeeded, max_concurrent = drivers, "batch finished");
        results
    }

    /// Async wrapper around [`execute`](Self::execute) for callers on a
    /// tokio runtime; the blocking wait runs on the blocking thread pool.
    pub async fn execute_async(self: Arc<Self>, mut request: TaskRequest) -> TaskResult {
        let execution_id = request
            .execution_id
            .get_or_insert_with(|| generate_id("exec"))
            .clone();
        match tokio::task::spawn_blocking(move || self.execute(request)).await {
            Ok(result) => result,
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "execute task join failed");
                TaskResult::rejected(execution_id, &SubmissionError::Unavailable(e.to_string()))
            }
        }
    }

    /// Cancel a non-terminal execution. No-op on terminal ones.
    ///
    /// The unit of work itself is not interrupted; its eventual result is
    /// ignored.
    pub fn cancel(&self, execution_id: &str, reason: &str) -> bool {
        self.ledger.cancel(execution_id, reason)
    }

    /// Stop accepting submissions.
    ///
    /// With `wait`, blocks until every queued and running unit of work has
    /// finished; otherwise in-flight work drains in the background.
    pub fn shutdown(&self, wait: bool) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!(wait, "task executor shutting down");
        }
        self.gate.close();
        self.pool.shutdown(wait);
    }

    /// Whether new submissions are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Current load snapshot.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            pool: self.pool.stats(),
            gate_capacity: self.gate.capacity(),
            gate_in_flight: self.gate.in_flight(),
            active_executions: self.ledger.active_count(),
            accepting: self.is_accepting(),
        }
    }

    fn reject_recorded(&self, execution_id: &str, err: &SubmissionError) -> TaskResult {
        warn!(execution_id = %execution_id, error = %err, "task submission failed");
        self.ledger.complete(
            execution_id,
            Completion::failed(TaskFault::new("submission", err.to_string())),
        );
        TaskResult::rejected(execution_id, err)
    }

    fn on_deadline(&self, execution_id: &str, timeout: Duration) -> TaskResult {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if self
            .ledger
            .complete(execution_id, Completion::timed_out(timeout_ms))
        {
            self.pool.discard(execution_id);
            warn!(execution_id = %execution_id, timeout_ms, "execution timed out, unit of work detached");
            return self.build_result(execution_id, None);
        }

        // Another terminal transition won. If it was the worker, its result
        // is about to land in the slot.
        let status = self.ledger.get(execution_id).map(|r| r.status);
        let late = if matches!(
            status,
            Some(ExecutionStatus::Completed | ExecutionStatus::Failed)
        ) {
            self.pool.retrieve(execution_id, LATE_RESULT_GRACE).ok()
        } else {
            None
        };
        self.pool.discard(execution_id);
        self.build_result(execution_id, late)
    }

    fn build_result(&self, execution_id: &str, outcome: Option<Outcome>) -> TaskResult {
        match self.ledger.get(execution_id) {
            Some(record) => result_from_record(record, outcome),
            // Evicted from history already; fall back to what the worker said.
            None => {
                let (status, data, error) = match outcome {
                    Some(Outcome::Success(value)) => (ExecutionStatus::Completed, Some(value), None),
                    Some(Outcome::Fault(fault)) => (ExecutionStatus::Failed, None, Some(fault)),
                    Some(Outcome::Skipped) | None => (ExecutionStatus::Failed, None, None),
                };
                TaskResult {
                    success: status == ExecutionStatus::Completed,
                    status,
                    message: status_message(status, error.as_ref()),
                    data,
                    error,
                    execution_id: execution_id.to_string(),
                    duration_ms: 0,
                }
            }
        }
    }
}

fn result_from_record(record: ExecutionRecord, outcome: Option<Outcome>) -> TaskResult {
    let data = match outcome {
        Some(Outcome::Success(value)) if record.status == ExecutionStatus::Completed => Some(value),
        _ => None,
    };
    TaskResult {
        success: record.status == ExecutionStatus::Completed,
        status: record.status,
        message: status_message(record.status, record.error.as_ref()),
        data,
        execution_id: record.execution_id,
        duration_ms: record.duration_ms.unwrap_or_default(),
        error: record.error,
    }
}

fn status_message(status: ExecutionStatus, error: Option<&TaskFault>) -> String {
    let detail = error.map_or("", |e| e.message.as_str());
    match status {
        ExecutionStatus::Completed => "Task completed successfully".to_string(),
        ExecutionStatus::Failed => format!("Task failed: {detail}"),
        ExecutionStatus::TimedOut => format!("Task timed out: {detail}"),
        ExecutionStatus::Cancelled => format!("Task cancelled: {detail}"),
        ExecutionStatus::Submitted | ExecutionStatus::Running => {
            format!("Task still {status}")
        }
    }
}

fn summarize(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= SUMMARY_LIMIT {
        return text;
    }
    let mut short: String = text.chars().take(SUMMARY_LIMIT).collect();
    short.push('…');
    short
}
