//! Unit-of-work contract, task requests, and caller-facing results.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::SubmissionError;
use crate::core::record::ExecutionStatus;
use crate::util::serde::{ExecutionId, Scope};

/// A captured fault: category, message, and optional context.
///
/// Faults raised inside a unit of work are recorded on the execution and
/// never re-raised to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFault {
    /// Classification, e.g. `"panic"`, `"validation"`, `"timeout"`.
    pub category: String,
    /// Human-readable message.
    pub message: String,
    /// Extra context such as the worker thread or a source chain.
    pub context: Option<String>,
}

impl TaskFault {
    /// Create a fault with no context.
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            context: None,
        }
    }

    /// Attach context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Classify an error by its type name and keep its source chain as context.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let type_name = std::any::type_name::<E>();
        let category = type_name.rsplit("::").next().unwrap_or(type_name);
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        let fault = Self::new(category, err.to_string());
        if chain.is_empty() {
            fault
        } else {
            fault.with_context(chain.join(": "))
        }
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let fault = Self::new("panic", message);
        match std::thread::current().name() {
            Some(name) => fault.with_context(format!("thread `{name}`")),
            None => fault,
        }
    }
}

impl fmt::Display for TaskFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl std::error::Error for TaskFault {}

impl From<anyhow::Error> for TaskFault {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().skip(1).map(ToString::to_string).peekable();
        let fault = Self::new("error", err.to_string());
        if chain.peek().is_none() {
            fault
        } else {
            fault.with_context(chain.collect::<Vec<_>>().join(": "))
        }
    }
}

/// Business logic run by the executor.
///
/// Implementations return a plain value or a classifiable fault. Panics are
/// caught and recorded as faults with category `"panic"`. Units of work are
/// never required to observe cancellation.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_governor::core::{TaskFault, WorkUnit};
/// use prometheus_task_governor::util::Scope;
/// use serde_json::{json, Value};
///
/// struct Forecast;
///
/// #[async_trait]
/// impl WorkUnit for Forecast {
///     async fn run(&self, input: Value, _scope: Scope) -> Result<Value, TaskFault> {
///         let horizon = input["horizon"].as_u64().ok_or_else(|| {
///             TaskFault::new("validation", "missing horizon")
///         })?;
///         Ok(json!({ "points": horizon }))
///     }
/// }
/// ```
#[async_trait]
pub trait WorkUnit: Send + Sync + 'static {
    /// Run with the submitted input and scope.
    async fn run(&self, input: Value, scope: Scope) -> Result<Value, TaskFault>;
}

/// Adapter turning a synchronous closure into a [`WorkUnit`].
pub struct FnUnit<F> {
    f: F,
}

#[async_trait]
impl<F> WorkUnit for FnUnit<F>
where
    F: Fn(Value, &Scope) -> Result<Value, TaskFault> + Send + Sync + 'static,
{
    async fn run(&self, input: Value, scope: Scope) -> Result<Value, TaskFault> {
        (self.f)(input, &scope)
    }
}

/// Wrap a synchronous closure as a shareable unit of work.
pub fn work_fn<F>(f: F) -> Arc<dyn WorkUnit>
where
    F: Fn(Value, &Scope) -> Result<Value, TaskFault> + Send + Sync + 'static,
{
    Arc::new(FnUnit { f })
}

/// What a worker produced for one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The unit of work returned a value.
    Success(Value),
    /// The unit of work returned a fault or panicked.
    Fault(TaskFault),
    /// Not run because the execution was already terminal when picked up.
    Skipped,
}

/// A task submission.
#[derive(Clone)]
pub struct TaskRequest {
    /// Caller-chosen identifier; generated when absent.
    pub execution_id: Option<ExecutionId>,
    /// Task class used for metrics and filtering.
    pub task_class: String,
    /// Scoping tags.
    pub scope: Scope,
    /// Input payload, also snapshotted on the execution record.
    pub input: Value,
    /// Overrides the executor's default timeout.
    pub timeout: Option<Duration>,
    /// The business logic to run.
    pub work: Arc<dyn WorkUnit>,
}

impl TaskRequest {
    /// Request with empty input and global scope.
    pub fn new(task_class: impl Into<String>, work: Arc<dyn WorkUnit>) -> Self {
        Self {
            execution_id: None,
            task_class: task_class.into(),
            scope: Scope::global(),
            input: Value::Null,
            timeout: None,
            work,
        }
    }

    /// Set the input payload.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set scoping tags.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Override the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use a caller-supplied execution identifier.
    #[must_use]
    pub fn with_execution_id(mut self, id: impl Into<ExecutionId>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    /// Reject malformed requests before anything is recorded.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.task_class.trim().is_empty() {
            return Err(SubmissionError::InvalidTask("task_class must not be empty".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(SubmissionError::InvalidTask("timeout must be greater than 0".into()));
        }
        if self.execution_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(SubmissionError::InvalidTask("execution_id must not be blank".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("execution_id", &self.execution_id)
            .field("task_class", &self.task_class)
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result returned to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// True only for `Completed`.
    pub success: bool,
    /// Terminal status recorded in the ledger.
    pub status: ExecutionStatus,
    /// Human-readable summary.
    pub message: String,
    /// Value returned by the unit of work.
    pub data: Option<Value>,
    /// Fault detail for unsuccessful executions.
    pub error: Option<TaskFault>,
    /// Identifier of the execution record.
    pub execution_id: ExecutionId,
    /// Wall time from submission to the terminal transition.
    pub duration_ms: u64,
}

impl TaskResult {
    /// Synthetic failed result for a submission that never ran.
    pub fn rejected(execution_id: impl Into<ExecutionId>, err: &SubmissionError) -> Self {
        Self {
            success: false,
            status: ExecutionStatus::Failed,
            message: format!("Task submission failed: {err}"),
            data: None,
            error: Some(TaskFault::new("submission", err.to_string())),
            execution_id: execution_id.into(),
            duration_ms: 0,
        }
    }
}
