//! Process context and the operational API surface.

pub mod api;
pub mod context;

pub use api::{
    acknowledge_alert, cancel_execution, check_budgets, get_cost_summary, get_execution,
    get_metrics, health, list_active_executions, list_alerts, list_execution_history,
    submit_task, BudgetCheck, Health, MetricsResponse, TaskStatusResponse, TaskSubmission,
};
pub use context::GovernorContext;
