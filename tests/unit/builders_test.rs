//! Tests for component builders

use chrono::Utc;
use prometheus_task_governor::builders::{build_executor, build_ledger, build_tracker};
use prometheus_task_governor::config::{BudgetConfig, ExecutorConfig, LedgerConfig};
use prometheus_task_governor::core::ExecutionLedger;
use prometheus_task_governor::util::{ManualClock, Scope};
use rust_decimal::Decimal;
use std::sync::Arc;

#[test]
fn test_build_ledger_in_memory() {
    let ledger = build_ledger(&LedgerConfig::default()).unwrap();
    assert_eq!(ledger.history_capacity(), 1000);
}

#[test]
fn test_build_tracker_applies_rate_overrides() {
    let cfg: BudgetConfig = serde_json::from_str(
        r#"{ "rates": [ { "provider": "openai", "resource_class": "gpt-4o",
                          "input_per_1k": "1", "output_per_1k": "2" } ] }"#,
    )
    .unwrap();
    let tracker = build_tracker(&cfg, Arc::new(ManualClock::new(Utc::now()))).unwrap();
    let entry = tracker.record_cost("openai", "gpt-4o", &Scope::global(), 1000, 1000);
    assert_eq!(entry.total_cost, Decimal::new(3, 0));
}

#[test]
fn test_build_executor_rejects_invalid_config() {
    let cfg = ExecutorConfig::new().with_worker_count(0);
    assert!(build_executor(&cfg, Arc::new(ExecutionLedger::default())).is_err());
}
