//! API-facing request/response models and operational entry points.
//!
//! These are thin functions over a [`GovernorContext`] for a web layer or ops
//! tooling to call; routing and authentication live elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::{AlertFilter, BudgetScope, BudgetStatus, CostAlert, CostSummary, SpendTotals};
use crate::core::{
    BudgetError, ExecutionMetrics, ExecutionRecord, ExecutionStatus, ExecutorStats, TaskRequest,
    TaskResult, WorkUnit,
};
use crate::runtime::GovernorContext;
use crate::util::serde::{ExecutionFilter, ExecutionId, Scope};

/// Task submission payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Caller-chosen execution identifier.
    pub execution_id: Option<ExecutionId>,
    /// Task class.
    pub task_class: String,
    /// Input payload.
    #[serde(default)]
    pub input: Value,
    /// Organization tag.
    pub organization: Option<String>,
    /// User tag.
    pub user: Option<String>,
    /// Timeout override in seconds.
    pub timeout_secs: Option<u64>,
}

impl TaskSubmission {
    /// Pair the submission with the unit of work that serves it.
    pub fn into_request(self, work: Arc<dyn WorkUnit>) -> TaskRequest {
        let mut request = TaskRequest::new(self.task_class, work)
            .with_input(self.input)
            .with_scope(Scope {
                organization: self.organization,
                user: self.user,
            });
        request.execution_id = self.execution_id;
        request.timeout = self.timeout_secs.map(Duration::from_secs);
        request
    }
}

/// Task status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Execution identifier.
    pub execution_id: ExecutionId,
    /// Current status.
    pub status: ExecutionStatus,
    /// Failure, timeout, or cancellation reason.
    pub reason: Option<String>,
    /// Submission-to-completion time once terminal.
    pub duration_ms: Option<u64>,
}

impl From<&ExecutionRecord> for TaskStatusResponse {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            execution_id: record.execution_id.clone(),
            status: record.status,
            reason: record.error.as_ref().map(|e| e.message.clone()),
            duration_ms: record.duration_ms,
        }
    }
}

/// Aggregate counters plus executor load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Task class the `metrics` field covers; `None` for all classes.
    pub task_class: Option<String>,
    /// Aggregate counters.
    pub metrics: ExecutionMetrics,
    /// Counters per task class.
    pub by_task_class: HashMap<String, ExecutionMetrics>,
    /// Executor load.
    pub executor: ExecutorStats,
}

/// Outcome of a forced budget evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCheck {
    /// Alerts raised by this cycle.
    pub new_alerts: Vec<CostAlert>,
    /// Standing of every rule after the cycle.
    pub statuses: Vec<BudgetStatus>,
    /// Cached rolling totals.
    pub totals: SpendTotals,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Executor accepts submissions.
    pub accepting: bool,
    /// Budget loops are running.
    pub monitoring: bool,
    /// Non-terminal executions.
    pub active_executions: usize,
    /// Alerts nobody acknowledged yet.
    pub unacknowledged_alerts: usize,
}

/// Submit a task and wait for its result without blocking the async runtime.
pub async fn submit_task(
    ctx: &GovernorContext,
    submission: TaskSubmission,
    work: Arc<dyn WorkUnit>,
) -> TaskResult {
    Arc::clone(ctx.executor())
        .execute_async(submission.into_request(work))
        .await
}

/// Status of one execution, active or historical.
pub fn get_execution(ctx: &GovernorContext, execution_id: &str) -> Option<TaskStatusResponse> {
    ctx.ledger().get(execution_id).as_ref().map(TaskStatusResponse::from)
}

/// Cancel a non-terminal execution.
pub fn cancel_execution(ctx: &GovernorContext, execution_id: &str, reason: &str) -> bool {
    ctx.executor().cancel(execution_id, reason)
}

/// Executions that have not reached a terminal state.
pub fn list_active_executions(ctx: &GovernorContext, filter: &ExecutionFilter) -> Vec<ExecutionRecord> {
    ctx.ledger().list_active(filter)
}

/// Recent terminal executions, newest first.
pub fn list_execution_history(
    ctx: &GovernorContext,
    filter: &ExecutionFilter,
    limit: usize,
) -> Vec<ExecutionRecord> {
    ctx.ledger().list_history(filter, limit)
}

/// Aggregate counters for one task class or for all of them.
pub fn get_metrics(ctx: &GovernorContext, task_class: Option<&str>) -> MetricsResponse {
    MetricsResponse {
        task_class: task_class.map(str::to_string),
        metrics: ctx.ledger().metrics(task_class),
        by_task_class: ctx.ledger().metrics_by_class(),
        executor: ctx.executor().stats(),
    }
}

/// Spend in `[start, end)`, optionally narrowed to a scope.
pub fn get_cost_summary(
    ctx: &GovernorContext,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    scope: Option<&BudgetScope>,
) -> CostSummary {
    ctx.tracker().get_cost_summary(start, end, scope)
}

/// Alerts matching `filter`, newest first.
pub fn list_alerts(ctx: &GovernorContext, filter: &AlertFilter) -> Vec<CostAlert> {
    ctx.tracker().list_alerts(filter)
}

/// Acknowledge an alert on behalf of `actor`.
///
/// # Errors
///
/// `BudgetError::AlertNotFound` for an unknown id.
pub fn acknowledge_alert(
    ctx: &GovernorContext,
    alert_id: &str,
    actor: &str,
) -> Result<CostAlert, BudgetError> {
    ctx.tracker().acknowledge_alert(alert_id, actor)
}

/// Run an evaluation cycle now instead of waiting for the next tick.
pub fn check_budgets(ctx: &GovernorContext) -> BudgetCheck {
    let tracker = ctx.tracker();
    let new_alerts = tracker.evaluate_all_rules();
    let statuses = tracker
        .list_rules()
        .iter()
        .filter_map(|rule| tracker.get_budget_status(&rule.id).ok())
        .collect();
    BudgetCheck {
        new_alerts,
        statuses,
        totals: tracker.spend_totals(),
    }
}

/// Return a health payload.
pub fn health(ctx: &GovernorContext) -> Health {
    let accepting = ctx.executor().is_accepting();
    let monitoring = ctx.is_monitoring();
    let unacknowledged_alerts = ctx
        .tracker()
        .list_alerts(&AlertFilter {
            unacknowledged_only: true,
            ..AlertFilter::default()
        })
        .len();
    Health {
        ok: accepting,
        accepting,
        monitoring,
        active_executions: ctx.ledger().active_count(),
        unacknowledged_alerts,
    }
}
