//! Integration tests for budget governance
//!
//! These tests validate:
//! - Exact decimal pricing against the built-in rate table
//! - One alert per threshold per period, in ascending threshold order
//! - Period rollover re-arms thresholds
//! - Cost summaries broken down by provider, model, organization, task class
//! - Cost state persisted through the JSON-lines store

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use prometheus_task_governor::budget::{
    AlertFilter, AlertSeverity, BudgetPeriod, BudgetRule, BudgetScope, CostAlert, CostEntry,
    CostSnapshot, CostStore, CostTracker, ModelRate, NewBudgetRule, RateTable, Usage,
};
use prometheus_task_governor::config::BudgetConfig;
use prometheus_task_governor::core::StoreError;
use prometheus_task_governor::infra::{InMemoryCostStore, JsonlCostStore};
use prometheus_task_governor::util::clock::{Clock, ManualClock};
use prometheus_task_governor::util::serde::Scope;
use rust_decimal::Decimal;
use std::sync::Arc;

// ============================================================================
// Helpers
// ============================================================================

/// Tracker on a manual clock with `acme/flat` priced at $10 per 1000 input units.
fn flat_tracker() -> (CostTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 14, 9, 0, 0).unwrap(),
    ));
    let mut rates = RateTable::from_config(&BudgetConfig::default());
    rates.set_rate("acme", "flat", ModelRate::new(Decimal::TEN, Decimal::ZERO));
    (CostTracker::new(rates).with_clock(clock.clone()), clock)
}

fn spend(tracker: &CostTracker, scope: &Scope, dollars: u64) {
    tracker.record_cost("acme", "flat", scope, dollars * 100, 0);
}

/// Store whose every write fails, as a full disk or dropped connection would.
struct FailingCostStore;

impl CostStore for FailingCostStore {
    fn append_entry(&mut self, _entry: &CostEntry) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }

    fn save_rule(&mut self, _rule: &BudgetRule) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }

    fn delete_rule(&mut self, _rule_id: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }

    fn save_alert(&mut self, _alert: &CostAlert) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }

    fn load(&self) -> Result<CostSnapshot, StoreError> {
        Ok(CostSnapshot::default())
    }
}

// ============================================================================
// Pricing
// ============================================================================

#[test]
fn test_builtin_pricing_is_exact() {
    let (tracker, _) = flat_tracker();
    let entry = tracker.record_cost("openai", "gpt-4o", &Scope::global(), 1500, 500);

    assert!(!entry.fallback_rate);
    assert_eq!(entry.input_cost, Decimal::new(375, 5));
    assert_eq!(entry.output_cost, Decimal::new(5, 3));
    assert_eq!(entry.total_cost, Decimal::new(875, 5));
}

#[test]
fn test_rate_lookup_ignores_case() {
    let (tracker, _) = flat_tracker();
    let entry = tracker.record_cost("OpenAI", "GPT-4o", &Scope::global(), 1000, 0);
    assert!(!entry.fallback_rate);
    assert_eq!(entry.total_cost, Decimal::new(25, 4));
}

#[test]
fn test_rate_update_applies_to_later_entries() {
    let (tracker, _) = flat_tracker();
    let before = tracker.record_cost("acme", "flat", &Scope::global(), 1000, 0);
    tracker.set_rate("acme", "flat", ModelRate::new(Decimal::ONE, Decimal::ZERO));
    let after = tracker.record_cost("acme", "flat", &Scope::global(), 1000, 0);

    assert_eq!(before.total_cost, Decimal::TEN);
    assert_eq!(after.total_cost, Decimal::ONE);
}

// ============================================================================
// Threshold alerts
// ============================================================================

#[test]
fn test_each_threshold_alerts_once_per_period() {
    let (tracker, _) = flat_tracker();
    let rule_id = tracker
        .create_budget_rule(
            NewBudgetRule::new("daily cap", BudgetPeriod::Daily, Decimal::new(100, 0))
                .with_thresholds([Decimal::new(5, 1), Decimal::new(9, 1), Decimal::ONE]),
        )
        .unwrap();

    spend(&tracker, &Scope::global(), 50);
    let first = tracker.evaluate_all_rules();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].threshold, Decimal::new(5, 1));
    assert_eq!(first[0].severity, AlertSeverity::Info);
    assert_eq!(first[0].rule_id, rule_id);

    assert!(tracker.evaluate_all_rules().is_empty());

    spend(&tracker, &Scope::global(), 45);
    let second = tracker.evaluate_all_rules();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].threshold, Decimal::new(9, 1));
    assert_eq!(second[0].severity, AlertSeverity::Critical);
    assert_eq!(second[0].spend, Decimal::new(95, 0));

    let all = tracker.list_alerts(&AlertFilter {
        rule_id: Some(rule_id),
        unacknowledged_only: false,
    });
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].threshold, Decimal::new(9, 1));
}

#[test]
fn test_organization_rule_crosses_thresholds_in_order() {
    let (tracker, _) = flat_tracker();
    tracker
        .create_budget_rule(
            NewBudgetRule::new("org A daily", BudgetPeriod::Daily, Decimal::new(25, 0))
                .with_thresholds([Decimal::new(5, 1), Decimal::ONE])
                .with_scope(BudgetScope::Organization("org_A".into())),
        )
        .unwrap();
    let org_a = Scope::organization("org_A");

    spend(&tracker, &org_a, 10);
    spend(&tracker, &Scope::organization("org_B"), 100);
    assert!(tracker.evaluate_all_rules().is_empty());

    spend(&tracker, &org_a, 10);
    let half = tracker.evaluate_all_rules();
    assert_eq!(half.len(), 1);
    assert_eq!(half[0].threshold, Decimal::new(5, 1));

    spend(&tracker, &org_a, 10);
    let full = tracker.evaluate_all_rules();
    assert_eq!(full.len(), 1);
    assert_eq!(full[0].threshold, Decimal::ONE);
    assert_eq!(full[0].severity, AlertSeverity::Emergency);
    assert_eq!(full[0].spend, Decimal::new(30, 0));

    assert_eq!(tracker.spend_today(Some("org_A")), Decimal::new(30, 0));
}

#[test]
fn test_jump_past_several_thresholds_raises_each() {
    let (tracker, _) = flat_tracker();
    tracker
        .create_budget_rule(
            NewBudgetRule::new("weekly", BudgetPeriod::Weekly, Decimal::new(10, 0))
                .with_thresholds([Decimal::new(5, 1), Decimal::new(8, 1), Decimal::ONE]),
        )
        .unwrap();
    spend(&tracker, &Scope::global(), 9);

    let thresholds: Vec<Decimal> = tracker
        .evaluate_all_rules()
        .into_iter()
        .map(|a| a.threshold)
        .collect();
    assert_eq!(thresholds, vec![Decimal::new(5, 1), Decimal::new(8, 1)]);
}

#[test]
fn test_new_period_rearms_thresholds() {
    let (tracker, clock) = flat_tracker();
    tracker
        .create_budget_rule(
            NewBudgetRule::new("daily", BudgetPeriod::Daily, Decimal::new(10, 0))
                .with_thresholds([Decimal::new(5, 1)]),
        )
        .unwrap();
    spend(&tracker, &Scope::global(), 6);
    assert_eq!(tracker.evaluate_all_rules().len(), 1);

    clock.advance(ChronoDuration::days(1));
    assert!(tracker.evaluate_all_rules().is_empty());
    spend(&tracker, &Scope::global(), 6);
    let next = tracker.evaluate_all_rules();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].period_start, BudgetPeriod::Daily.start_of(clock.now()));
}

#[test]
fn test_task_class_scope_counts_tagged_usage_only() {
    let (tracker, _) = flat_tracker();
    let rule_id = tracker
        .create_budget_rule(
            NewBudgetRule::new("forecast", BudgetPeriod::Monthly, Decimal::new(20, 0))
                .with_thresholds([Decimal::ONE])
                .with_scope(BudgetScope::TaskClass("forecast".into())),
        )
        .unwrap();
    tracker.record_usage(Usage::new("acme", "flat", 1000, 0).with_task_class("forecast"));
    tracker.record_usage(Usage::new("acme", "flat", 5000, 0).with_task_class("summarize"));

    let status = tracker.get_budget_status(&rule_id).unwrap();
    assert_eq!(status.spend, Decimal::TEN);
    assert_eq!(status.utilization, Decimal::new(5, 1));
    assert!(tracker.evaluate_all_rules().is_empty());
}

// ============================================================================
// Summaries and persistence
// ============================================================================

#[test]
fn test_cost_summary_breakdowns() {
    let (tracker, clock) = flat_tracker();
    let window_start = clock.now();
    tracker.record_usage(
        Usage::new("acme", "flat", 1000, 0)
            .with_scope(Scope::organization("org_A"))
            .with_task_class("forecast"),
    );
    tracker.record_usage(Usage::new("openai", "gpt-4o", 1000, 1000).with_scope(Scope::organization("org_B")));
    clock.advance(ChronoDuration::hours(2));
    tracker.record_usage(Usage::new("acme", "flat", 500, 0).with_scope(Scope::organization("org_A")));

    let all = tracker.get_cost_summary(None, None, None);
    assert_eq!(all.entry_count, 3);
    assert_eq!(all.total_cost, Decimal::new(150_125, 4));
    assert_eq!(all.by_provider["acme"], Decimal::new(15, 0));
    assert_eq!(all.by_model["openai/gpt-4o"], Decimal::new(125, 4));
    assert_eq!(all.by_organization["org_A"], Decimal::new(15, 0));
    assert_eq!(all.by_task_class["forecast"], Decimal::TEN);
    assert_eq!(all.by_task_class.len(), 1);

    let first_hour = tracker.get_cost_summary(
        Some(window_start),
        Some(window_start + ChronoDuration::hours(1)),
        Some(&BudgetScope::Organization("org_A".into())),
    );
    assert_eq!(first_hour.entry_count, 1);
    assert_eq!(first_hour.total_cost, Decimal::TEN);
}

#[test]
fn test_in_memory_store_restores_rules_and_alerts() {
    let store = InMemoryCostStore::new();
    let (tracker, clock) = flat_tracker();
    let tracker = tracker.with_store(Box::new(store.clone())).unwrap();
    tracker
        .create_budget_rule(
            NewBudgetRule::new("r", BudgetPeriod::Daily, Decimal::TEN)
                .with_thresholds([Decimal::new(5, 1)]),
        )
        .unwrap();
    spend(&tracker, &Scope::global(), 6);
    let raised = tracker.evaluate_all_rules();
    tracker.acknowledge_alert(&raised[0].id, "ops").unwrap();

    let restored = CostTracker::new(RateTable::from_config(&BudgetConfig::default()))
        .with_clock(clock)
        .with_store(Box::new(store))
        .unwrap();
    assert_eq!(restored.entry_count(), 1);
    assert_eq!(restored.list_rules().len(), 1);
    let alerts = restored.list_alerts(&AlertFilter::default());
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].acknowledged);
    assert_eq!(restored.spend_today(None), Decimal::new(6, 0));
}

#[test]
fn test_jsonl_store_replays_deleted_rules() {
    let dir = std::env::temp_dir().join(format!("tg-budget-{}", uuid::Uuid::new_v4()));
    let (tracker, clock) = flat_tracker();
    let tracker = tracker
        .with_store(Box::new(JsonlCostStore::open(&dir).unwrap()))
        .unwrap();
    let keep = tracker
        .create_budget_rule(NewBudgetRule::new("keep", BudgetPeriod::Daily, Decimal::TEN).with_thresholds([Decimal::ONE]))
        .unwrap();
    let gone = tracker
        .create_budget_rule(NewBudgetRule::new("gone", BudgetPeriod::Daily, Decimal::TEN).with_thresholds([Decimal::ONE]))
        .unwrap();
    tracker.delete_rule(&gone).unwrap();
    drop(tracker);

    let restored = CostTracker::new(RateTable::from_config(&BudgetConfig::default()))
        .with_clock(clock)
        .with_store(Box::new(JsonlCostStore::open(&dir).unwrap()))
        .unwrap();
    let ids: Vec<String> = restored.list_rules().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![keep]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_store_write_failures_keep_memory_state() {
    let (tracker, _) = flat_tracker();
    let tracker = tracker.with_store(Box::new(FailingCostStore)).unwrap();
    let rule_id = tracker
        .create_budget_rule(
            NewBudgetRule::new("daily", BudgetPeriod::Daily, Decimal::TEN)
                .with_thresholds([Decimal::new(5, 1)]),
        )
        .unwrap();
    assert!(tracker.get_rule(&rule_id).is_some());

    let entry = tracker.record_cost("acme", "flat", &Scope::organization("org_A"), 600, 0);
    assert_eq!(entry.total_cost, Decimal::new(6, 0));
    assert_eq!(tracker.spend_today(None), Decimal::new(6, 0));
    assert_eq!(tracker.spend_today(Some("org_A")), Decimal::new(6, 0));

    let summary = tracker.get_cost_summary(None, None, None);
    assert_eq!(summary.entry_count, 1);
    assert_eq!(summary.total_cost, Decimal::new(6, 0));

    let raised = tracker.evaluate_all_rules();
    assert_eq!(raised.len(), 1);
    assert_eq!(tracker.list_alerts(&AlertFilter::default()).len(), 1);
    // The unpersisted alert still suppresses duplicates.
    assert!(tracker.evaluate_all_rules().is_empty());

    let acked = tracker.acknowledge_alert(&raised[0].id, "ops").unwrap();
    assert!(acked.acknowledged);
    assert!(tracker.delete_rule(&rule_id).is_ok());
    assert!(tracker.list_rules().is_empty());
}

// ============================================================================
// Retention
// ============================================================================

#[test]
fn test_rollup_prunes_entries_outside_every_period() {
    let (tracker, clock) = flat_tracker();
    tracker
        .create_budget_rule(
            NewBudgetRule::new("yearly", BudgetPeriod::Yearly, Decimal::new(1_000_000, 0))
                .with_thresholds([Decimal::ONE]),
        )
        .unwrap();
    for _ in 0..1000 {
        tracker.record_cost("acme", "flat", &Scope::global(), 100, 0);
    }
    assert_eq!(tracker.entry_count(), 1000);

    // Still inside the current year: nothing is dropped.
    tracker.recompute_totals();
    assert_eq!(tracker.entry_count(), 1000);

    clock.advance(ChronoDuration::days(3 * 365));
    assert!(tracker.evaluate_all_rules().is_empty());
    let totals = tracker.recompute_totals();
    assert_eq!(tracker.entry_count(), 0);
    assert_eq!(totals.this_year, Decimal::ZERO);

    spend(&tracker, &Scope::global(), 5);
    tracker.recompute_totals();
    assert_eq!(tracker.entry_count(), 1);
}

#[test]
fn test_rollup_keeps_week_that_began_last_year() {
    // Monday 2024-12-30; the week runs into 2025.
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 12, 30, 10, 0, 0).unwrap(),
    ));
    let mut rates = RateTable::from_config(&BudgetConfig::default());
    rates.set_rate("acme", "flat", ModelRate::new(Decimal::TEN, Decimal::ZERO));
    let tracker = CostTracker::new(rates).with_clock(clock.clone());
    let rule_id = tracker
        .create_budget_rule(
            NewBudgetRule::new("weekly", BudgetPeriod::Weekly, Decimal::new(100, 0))
                .with_thresholds([Decimal::ONE]),
        )
        .unwrap();
    spend(&tracker, &Scope::global(), 40);

    clock.advance(ChronoDuration::days(2));
    let totals = tracker.recompute_totals();
    assert_eq!(tracker.entry_count(), 1);
    assert_eq!(totals.this_week, Decimal::new(40, 0));
    assert_eq!(totals.this_year, Decimal::ZERO);
    assert_eq!(
        tracker.get_budget_status(&rule_id).unwrap().spend,
        Decimal::new(40, 0)
    );
}

#[test]
fn test_purge_entries_before_cutoff() {
    let (tracker, clock) = flat_tracker();
    spend(&tracker, &Scope::global(), 1);
    clock.advance(ChronoDuration::hours(1));
    let cutoff = clock.now();
    spend(&tracker, &Scope::global(), 2);

    assert_eq!(tracker.purge_entries_before(cutoff), 1);
    assert_eq!(tracker.entry_count(), 1);
    assert_eq!(tracker.get_cost_summary(None, None, None).total_cost, Decimal::new(2, 0));
    assert_eq!(tracker.purge_entries_before(cutoff), 0);
}
