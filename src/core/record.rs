//! Execution records and their lifecycle states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::task::TaskFault;
use crate::util::serde::{ExecutionId, Scope};

/// Status of an execution in its lifecycle.
///
/// `Submitted -> Running -> {Completed | Failed | TimedOut | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Recorded, waiting for admission or a worker.
    Submitted,
    /// A worker is running the unit of work.
    Running,
    /// Finished and returned a value.
    Completed,
    /// Faulted, or could not be submitted.
    Failed,
    /// The caller stopped waiting at the deadline.
    TimedOut,
    /// Cancelled before reaching another terminal state.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further transitions are allowed.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Position in the lifecycle; terminal states share the last rank.
    const fn rank(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub const fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Lowercase name used in logs and persisted records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per task submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique, immutable identifier.
    pub execution_id: ExecutionId,
    /// Task class, e.g. `"forecast"`.
    pub task_class: String,
    /// Scoping tags of the submitter.
    pub scope: Scope,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// When the record was created.
    pub submitted_at: DateTime<Utc>,
    /// When a worker picked the task up.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, at the terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
    /// Submission-to-completion time, set with `completed_at`.
    pub duration_ms: Option<u64>,
    /// Meaningful only once terminal.
    pub success: Option<bool>,
    /// Short description of the result.
    pub result_summary: Option<String>,
    /// Fault classification for unsuccessful executions.
    pub error: Option<TaskFault>,
    /// Caller-supplied input snapshot.
    pub input: Value,
    /// Free-form annotations attached through status updates.
    pub metadata: Map<String, Value>,
}

impl ExecutionRecord {
    /// Fresh record in the `Submitted` state.
    pub fn submitted(
        execution_id: impl Into<ExecutionId>,
        task_class: impl Into<String>,
        scope: Scope,
        input: Value,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_class: task_class.into(),
            scope,
            status: ExecutionStatus::Submitted,
            submitted_at,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            success: None,
            result_summary: None,
            error: None,
            input,
            metadata: Map::new(),
        }
    }

    /// Whether the record reached a terminal state.
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Terminal transition request for an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Terminal status to record.
    pub status: ExecutionStatus,
    /// Short description of the result.
    pub result_summary: Option<String>,
    /// Fault detail for unsuccessful outcomes.
    pub error: Option<TaskFault>,
}

impl Completion {
    /// Successful completion.
    pub fn succeeded(result_summary: Option<String>) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            result_summary,
            error: None,
        }
    }

    /// Failed completion carrying the captured fault.
    pub fn failed(fault: TaskFault) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            result_summary: None,
            error: Some(fault),
        }
    }

    /// The caller gave up waiting after `timeout_ms`.
    pub fn timed_out(timeout_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::TimedOut,
            result_summary: None,
            error: Some(TaskFault::new(
                "timeout",
                format!("execution exceeded timeout of {timeout_ms}ms"),
            )),
        }
    }

    /// Explicit cancellation.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            result_summary: None,
            error: Some(TaskFault::new("cancelled", reason)),
        }
    }
}
