//! Error types for executor, ledger, and budget operations.

use thiserror::Error;

/// Errors raised before a unit of work is accepted for execution.
///
/// These are the only errors surfaced synchronously to submitters, and they
/// reach them as a failed [`TaskResult`](crate::core::TaskResult), never as a
/// queued task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The executor is shut down and accepts no new work.
    #[error("executor is shut down")]
    Shutdown,
    /// The worker pool queue is full.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The task request is malformed.
    #[error("invalid task: {0}")]
    InvalidTask(String),
    /// An execution with this identifier is already tracked.
    #[error("duplicate execution id: {0}")]
    DuplicateId(String),
    /// The worker pool could not take the task.
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Durability failures in execution or cost stores.
///
/// Callers log these and keep going; in-memory state is authoritative.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from budget rule and alert management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    /// Rule definition failed validation.
    #[error("invalid budget rule: {0}")]
    InvalidRule(String),
    /// No rule with this identifier.
    #[error("budget rule not found: {0}")]
    RuleNotFound(String),
    /// No alert with this identifier.
    #[error("alert not found: {0}")]
    AlertNotFound(String),
}

/// Errors from configuration parsing and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Input could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
