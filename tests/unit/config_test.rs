//! Tests for configuration validation and loading

use prometheus_task_governor::config::{BudgetConfig, ExecutorConfig, GovernorConfig, LedgerConfig};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config_is_valid() {
    let cfg = GovernorConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.executor.worker_count >= 1);
    assert_eq!(cfg.executor.max_in_flight, cfg.executor.worker_count);
    assert_eq!(cfg.ledger.history_capacity, 1000);
    assert_eq!(cfg.budget.evaluation_interval_secs, 60);
    assert_eq!(cfg.budget.rollup_interval_secs, 300);
}

#[test]
fn test_zero_history_capacity_rejected() {
    let cfg = GovernorConfig {
        ledger: LedgerConfig {
            history_capacity: 0,
            store_path: None,
        },
        ..GovernorConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_evaluation_interval_rejected() {
    let cfg = GovernorConfig {
        budget: BudgetConfig {
            evaluation_interval_secs: 0,
            ..BudgetConfig::default()
        },
        ..GovernorConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("budget"));
}

#[test]
fn test_negative_fallback_rate_rejected() {
    let cfg = BudgetConfig {
        fallback_input_per_1k: Decimal::new(-1, 2),
        ..BudgetConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_partial_json_keeps_defaults() {
    let cfg = GovernorConfig::from_json_str(
        r#"{ "executor": { "worker_count": 3, "max_in_flight": 2 } }"#,
    )
    .unwrap();
    assert_eq!(cfg.executor.worker_count, 3);
    assert_eq!(cfg.executor.max_in_flight, 2);
    assert_eq!(cfg.executor.default_timeout_secs, ExecutorConfig::default().default_timeout_secs);
    assert_eq!(cfg.budget, BudgetConfig::default());
}

#[test]
fn test_malformed_json_is_a_parse_error() {
    let err = GovernorConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.to_string().starts_with("parse error"));
}

#[test]
fn test_env_overrides() {
    let cfg = GovernorConfig::default()
        .with_overrides(lookup(&[
            ("GOVERNOR_WORKER_COUNT", "6"),
            ("GOVERNOR_MAX_IN_FLIGHT", " 4 "),
            ("GOVERNOR_HISTORY_CAPACITY", "250"),
            ("GOVERNOR_EVALUATION_INTERVAL_SECS", "15"),
            ("GOVERNOR_BUDGET_STORE_DIR", "/var/lib/governor"),
        ]))
        .unwrap();
    assert_eq!(cfg.executor.worker_count, 6);
    assert_eq!(cfg.executor.max_in_flight, 4);
    assert_eq!(cfg.ledger.history_capacity, 250);
    assert_eq!(cfg.budget.evaluation_interval_secs, 15);
    assert_eq!(cfg.budget.store_dir, Some(PathBuf::from("/var/lib/governor")));
}

#[test]
fn test_env_override_parse_failure() {
    let err = GovernorConfig::default()
        .with_overrides(lookup(&[("GOVERNOR_WORKER_COUNT", "many")]))
        .unwrap_err();
    assert!(err.to_string().contains("GOVERNOR_WORKER_COUNT"));
}
