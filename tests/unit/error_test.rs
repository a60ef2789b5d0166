//! Tests for error types

use prometheus_task_governor::core::{BudgetError, ConfigError, StoreError, SubmissionError};

#[test]
fn test_queue_full_error() {
    let err = SubmissionError::QueueFull("8 tasks pending".to_string());
    assert_eq!(format!("{}", err), "queue full: 8 tasks pending");
}

#[test]
fn test_shutdown_error() {
    assert_eq!(SubmissionError::Shutdown.to_string(), "executor is shut down");
}

#[test]
fn test_duplicate_id_error() {
    let err = SubmissionError::DuplicateId("exec-1".to_string());
    assert_eq!(format!("{}", err), "duplicate execution id: exec-1");
}

#[test]
fn test_budget_errors() {
    assert_eq!(
        BudgetError::RuleNotFound("rule_1".into()).to_string(),
        "budget rule not found: rule_1"
    );
    assert_eq!(
        BudgetError::AlertNotFound("alert_1".into()).to_string(),
        "alert not found: alert_1"
    );
}

#[test]
fn test_store_error_from_io() {
    let err: StoreError = std::io::Error::other("disk gone").into();
    assert_eq!(err.to_string(), "io error: disk gone");
}

#[test]
fn test_config_error_converts_to_app_error() {
    let err: anyhow::Error = ConfigError::Invalid("worker_count must be greater than 0".into()).into();
    assert!(err.to_string().contains("worker_count"));
}
