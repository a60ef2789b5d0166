//! Execution core: task model, worker pool, admission gate, and ledger.

pub mod error;
pub mod executor;
pub mod gate;
pub mod hooks;
pub mod ledger;
pub mod metrics;
pub mod record;
pub mod task;
pub mod worker_pool;

pub use error::{AppResult, BudgetError, ConfigError, StoreError, SubmissionError};
pub use executor::{ExecutorStats, TaskExecutor};
pub use gate::{AdmissionGate, GatePermit};
pub use hooks::{HookContext, HookRegistry, PostHook, PreHook};
pub use ledger::{ExecutionLedger, ExecutionStore, DEFAULT_HISTORY_CAPACITY};
pub use metrics::ExecutionMetrics;
pub use record::{Completion, ExecutionRecord, ExecutionStatus};
pub use task::{work_fn, FnUnit, Outcome, TaskFault, TaskRequest, TaskResult, WorkUnit};
pub use worker_pool::{PoolError, PoolStats, WorkMeta, WorkerExecutor, WorkerPool};
