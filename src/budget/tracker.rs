//! Cost metering, budget rules, and threshold evaluation.
//!
//! [`CostTracker`] owns the in-memory cost ledger, rules, and alerts behind a
//! single `parking_lot::Mutex`. Durable writes and alert callbacks run after
//! the lock is released, so a slow store or a callback that calls back into
//! the tracker never stalls or deadlocks metering.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::budget::period::BudgetPeriod;
use crate::budget::rates::{ModelRate, RateTable};
use crate::budget::store::CostStore;
use crate::budget::types::{
    AlertFilter, AlertSeverity, BudgetRule, BudgetScope, BudgetStatus, CostAlert, CostEntry,
    CostSummary, NewBudgetRule, SpendTotals, Usage,
};
use crate::core::error::{AppResult, BudgetError, StoreError};
use crate::util::clock::{Clock, SystemClock};
use crate::util::serde::{generate_id, Scope};

/// Callback invoked for every newly materialized alert.
pub type AlertCallback = Arc<dyn Fn(&CostAlert) -> AppResult<()> + Send + Sync>;

/// Spend since the start of the current UTC day.
struct TodayWindow {
    day_start: DateTime<Utc>,
    total: Decimal,
    by_organization: HashMap<String, Decimal>,
}

impl TodayWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            day_start: BudgetPeriod::Daily.start_of(now),
            total: Decimal::ZERO,
            by_organization: HashMap::new(),
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if BudgetPeriod::Daily.start_of(now) != self.day_start {
            *self = Self::new(now);
        }
    }

    fn add(&mut self, entry: &CostEntry) {
        if BudgetPeriod::Daily.start_of(entry.timestamp) != self.day_start {
            return;
        }
        self.total += entry.total_cost;
        if let Some(org) = &entry.scope.organization {
            *self.by_organization.entry(org.clone()).or_default() += entry.total_cost;
        }
    }
}

struct TrackerState {
    entries: Vec<CostEntry>,
    rules: HashMap<String, BudgetRule>,
    alerts: Vec<CostAlert>,
    today: TodayWindow,
    totals: SpendTotals,
}

impl TrackerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            rules: HashMap::new(),
            alerts: Vec::new(),
            today: TodayWindow::new(now),
            totals: SpendTotals::default(),
        }
    }

    fn spend(&self, scope: &BudgetScope, start: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end && scope.matches(e))
            .map(|e| e.total_cost)
            .sum()
    }

    fn has_active_alert(&self, rule_id: &str, threshold: Decimal, period_start: DateTime<Utc>) -> bool {
        self.alerts.iter().any(|a| {
            a.rule_id == rule_id && a.threshold == threshold && a.is_active(period_start)
        })
    }

    fn rule(&self, rule_id: &str) -> Result<&BudgetRule, BudgetError> {
        self.rules
            .get(rule_id)
            .ok_or_else(|| BudgetError::RuleNotFound(rule_id.to_string()))
    }
}

/// Meters cost, holds budget rules, and raises threshold alerts.
pub struct CostTracker {
    rates: RwLock<RateTable>,
    state: Mutex<TrackerState>,
    callbacks: RwLock<Vec<AlertCallback>>,
    store: Option<Mutex<Box<dyn CostStore>>>,
    clock: Arc<dyn Clock>,
}

impl CostTracker {
    /// Tracker pricing with `rates` on the system clock.
    pub fn new(rates: RateTable) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            rates: RwLock::new(rates),
            state: Mutex::new(TrackerState::new(clock.now())),
            callbacks: RwLock::new(Vec::new()),
            store: None,
            clock,
        }
    }

    /// Read time from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.state.get_mut().today = TodayWindow::new(clock.now());
        self.clock = clock;
        self
    }

    /// Attach a durable store and restore whatever it holds.
    ///
    /// # Errors
    ///
    /// Propagates the store's load failure.
    pub fn with_store(mut self, store: Box<dyn CostStore>) -> Result<Self, StoreError> {
        let snapshot = store.load()?;
        let now = self.clock.now();
        let state = self.state.get_mut();
        state.today.roll(now);
        for entry in &snapshot.entries {
            state.today.add(entry);
        }
        info!(
            entries = snapshot.entries.len(),
            rules = snapshot.rules.len(),
            alerts = snapshot.alerts.len(),
            "restored cost state"
        );
        state.entries = snapshot.entries;
        state.rules = snapshot
            .rules
            .into_iter()
            .map(|rule| (rule.id.clone(), rule))
            .collect();
        state.alerts = snapshot.alerts;
        self.store = Some(Mutex::new(store));
        Ok(self)
    }

    /// Current time according to the tracker's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert or replace the rate for a provider resource.
    pub fn set_rate(&self, provider: &str, resource_class: &str, rate: ModelRate) {
        self.rates.write().set_rate(provider, resource_class, rate);
        info!(provider, resource_class, "rate updated");
    }

    /// Register a callback for newly raised alerts.
    pub fn on_alert(&self, callback: AlertCallback) {
        self.callbacks.write().push(callback);
    }

    /// Price and record one externally billed call.
    pub fn record_cost(
        &self,
        provider: &str,
        resource_class: &str,
        scope: &Scope,
        input_units: u64,
        output_units: u64,
    ) -> CostEntry {
        self.record_usage(
            Usage::new(provider, resource_class, input_units, output_units).with_scope(scope.clone()),
        )
    }

    /// Price and record a usage report.
    ///
    /// Unknown provider/resource pairs are priced at the fallback rate and
    /// flagged with a warning rather than rejected.
    pub fn record_usage(&self, usage: Usage) -> CostEntry {
        let pricing = self.rates.read().price(
            &usage.provider,
            &usage.resource_class,
            usage.input_units,
            usage.output_units,
        );
        if pricing.fallback {
            warn!(
                provider = %usage.provider,
                resource_class = %usage.resource_class,
                "no rate for provider resource, applied fallback rate"
            );
        }
        let now = self.clock.now();
        let entry = CostEntry {
            id: generate_id("cost"),
            timestamp: now,
            provider: usage.provider,
            resource_class: usage.resource_class,
            scope: usage.scope,
            task_class: usage.task_class,
            input_units: usage.input_units,
            output_units: usage.output_units,
            input_cost: pricing.input_cost,
            output_cost: pricing.output_cost,
            total_cost: pricing.total_cost,
            fallback_rate: pricing.fallback,
            metadata: usage.metadata,
        };
        {
            let mut state = self.state.lock();
            state.today.roll(now);
            state.today.add(&entry);
            state.entries.push(entry.clone());
        }
        debug!(
            entry_id = %entry.id,
            provider = %entry.provider,
            resource_class = %entry.resource_class,
            total_cost = %entry.total_cost,
            "cost recorded"
        );
        self.persist("cost entry", |store| store.append_entry(&entry));
        entry
    }

    /// Spend since 00:00 UTC, across all spend or for one organization.
    pub fn spend_today(&self, organization: Option<&str>) -> Decimal {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.today.roll(now);
        match organization {
            Some(org) => state
                .today
                .by_organization
                .get(org)
                .copied()
                .unwrap_or_default(),
            None => state.today.total,
        }
    }

    /// Number of cost entries held in memory.
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Drop in-memory entries recorded before `cutoff`. The durable log is
    /// untouched. Returns the number removed.
    pub fn purge_entries_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.timestamp >= cutoff);
        let removed = before - state.entries.len();
        if removed > 0 {
            info!(removed, "purged cost entries");
        }
        removed
    }

    /// Validate and store a new rule. Thresholds are sorted ascending and
    /// de-duplicated.
    ///
    /// # Errors
    ///
    /// `BudgetError::InvalidRule` for an empty name, a non-positive cap, no
    /// thresholds, or a threshold not greater than zero.
    pub fn create_budget_rule(&self, new_rule: NewBudgetRule) -> Result<String, BudgetError> {
        if new_rule.name.trim().is_empty() {
            return Err(BudgetError::InvalidRule("name must not be empty".into()));
        }
        if new_rule.cap <= Decimal::ZERO {
            return Err(BudgetError::InvalidRule("cap must be greater than 0".into()));
        }
        if new_rule.thresholds.is_empty() {
            return Err(BudgetError::InvalidRule("at least one threshold is required".into()));
        }
        if let Some(bad) = new_rule.thresholds.iter().find(|t| **t <= Decimal::ZERO) {
            return Err(BudgetError::InvalidRule(format!(
                "threshold {bad} must be greater than 0"
            )));
        }
        let mut thresholds = new_rule.thresholds;
        thresholds.sort();
        thresholds.dedup();

        let rule = BudgetRule {
            id: generate_id("rule"),
            name: new_rule.name,
            period: new_rule.period,
            cap: new_rule.cap,
            thresholds,
            scope: new_rule.scope,
            enabled: true,
            created_at: self.clock.now(),
        };
        let id = rule.id.clone();
        self.state.lock().rules.insert(id.clone(), rule.clone());
        info!(
            rule_id = %id,
            name = %rule.name,
            period = %rule.period,
            cap = %rule.cap,
            scope = %rule.scope,
            "budget rule created"
        );
        self.persist("budget rule", |store| store.save_rule(&rule));
        Ok(id)
    }

    /// Look up a rule.
    pub fn get_rule(&self, rule_id: &str) -> Option<BudgetRule> {
        self.state.lock().rules.get(rule_id).cloned()
    }

    /// All rules, oldest first.
    pub fn list_rules(&self) -> Vec<BudgetRule> {
        let mut rules: Vec<_> = self.state.lock().rules.values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    /// Enable or disable a rule.
    ///
    /// # Errors
    ///
    /// `BudgetError::RuleNotFound` for an unknown id.
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<BudgetRule, BudgetError> {
        let rule = {
            let mut state = self.state.lock();
            let rule = state
                .rules
                .get_mut(rule_id)
                .ok_or_else(|| BudgetError::RuleNotFound(rule_id.to_string()))?;
            rule.enabled = enabled;
            rule.clone()
        };
        info!(rule_id, enabled, "budget rule toggled");
        self.persist("budget rule", |store| store.save_rule(&rule));
        Ok(rule)
    }

    /// Remove a rule. Its alerts stay queryable.
    ///
    /// # Errors
    ///
    /// `BudgetError::RuleNotFound` for an unknown id.
    pub fn delete_rule(&self, rule_id: &str) -> Result<BudgetRule, BudgetError> {
        let rule = self
            .state
            .lock()
            .rules
            .remove(rule_id)
            .ok_or_else(|| BudgetError::RuleNotFound(rule_id.to_string()))?;
        info!(rule_id, "budget rule deleted");
        self.persist("rule deletion", |store| store.delete_rule(rule_id));
        Ok(rule)
    }

    /// Spend against one rule in its current period.
    ///
    /// # Errors
    ///
    /// `BudgetError::RuleNotFound` for an unknown id.
    pub fn get_budget_status(&self, rule_id: &str) -> Result<BudgetStatus, BudgetError> {
        let now = self.clock.now();
        let state = self.state.lock();
        let rule = state.rule(rule_id)?;
        let period_start = rule.period.start_of(now);
        let period_end = rule.period.end_of(now);
        let spend = state.spend(&rule.scope, period_start, period_end);
        let utilization = if rule.cap.is_zero() {
            Decimal::ZERO
        } else {
            spend / rule.cap
        };
        Ok(BudgetStatus {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            period: rule.period,
            period_start,
            period_end,
            spend,
            cap: rule.cap,
            utilization,
            remaining: (rule.cap - spend).max(Decimal::ZERO),
            enabled: rule.enabled,
        })
    }

    /// Run one evaluation cycle over every enabled rule.
    ///
    /// For each threshold whose `cap × threshold` is covered by in-period
    /// spend and that has no active alert yet, an alert is materialized,
    /// persisted, and handed to every callback. Returns the new alerts.
    pub fn evaluate_all_rules(&self) -> Vec<CostAlert> {
        let now = self.clock.now();
        let raised = {
            let mut state = self.state.lock();
            let mut rules: Vec<BudgetRule> =
                state.rules.values().filter(|r| r.enabled).cloned().collect();
            rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            let mut raised = Vec::new();
            for rule in rules {
                let period_start = rule.period.start_of(now);
                let spend = state.spend(&rule.scope, period_start, rule.period.end_of(now));
                for threshold in &rule.thresholds {
                    if rule.cap * *threshold > spend {
                        break;
                    }
                    if state.has_active_alert(&rule.id, *threshold, period_start) {
                        continue;
                    }
                    let alert = materialize(&rule, *threshold, spend, period_start, now);
                    state.alerts.push(alert.clone());
                    raised.push(alert);
                }
            }
            raised
        };

        for alert in &raised {
            log_alert(alert);
            self.persist("alert", |store| store.save_alert(alert));
            self.notify(alert);
        }
        debug!(raised = raised.len(), "budget evaluation finished");
        raised
    }

    /// Alerts matching `filter`, newest first.
    pub fn list_alerts(&self, filter: &AlertFilter) -> Vec<CostAlert> {
        let state = self.state.lock();
        state
            .alerts
            .iter()
            .rev()
            .filter(|a| filter.rule_id.as_deref().is_none_or(|id| a.rule_id == id))
            .filter(|a| !filter.unacknowledged_only || !a.acknowledged)
            .cloned()
            .collect()
    }

    /// Mark an alert acknowledged. Acknowledging twice keeps the first actor.
    ///
    /// # Errors
    ///
    /// `BudgetError::AlertNotFound` for an unknown id.
    pub fn acknowledge_alert(&self, alert_id: &str, actor: &str) -> Result<CostAlert, BudgetError> {
        let now = self.clock.now();
        let (alert, changed) = {
            let mut state = self.state.lock();
            let alert = state
                .alerts
                .iter_mut()
                .find(|a| a.id == alert_id)
                .ok_or_else(|| BudgetError::AlertNotFound(alert_id.to_string()))?;
            let changed = !alert.acknowledged;
            if changed {
                alert.acknowledged = true;
                alert.acknowledged_by = Some(actor.to_string());
                alert.acknowledged_at = Some(now);
            }
            (alert.clone(), changed)
        };
        if changed {
            info!(alert_id, actor, rule_id = %alert.rule_id, "alert acknowledged");
            self.persist("alert", |store| store.save_alert(&alert));
        }
        Ok(alert)
    }

    /// Aggregate spend in `[start, end)`, optionally narrowed to a scope.
    pub fn get_cost_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        scope: Option<&BudgetScope>,
    ) -> CostSummary {
        let mut summary = CostSummary {
            start,
            end,
            ..CostSummary::default()
        };
        let state = self.state.lock();
        for entry in state.entries.iter().filter(|e| {
            start.is_none_or(|s| e.timestamp >= s)
                && end.is_none_or(|t| e.timestamp < t)
                && scope.is_none_or(|s| s.matches(e))
        }) {
            summary.add(entry);
        }
        summary
    }

    /// Recompute today/week/month/year totals and cache them.
    ///
    /// Entries older than every period a rule can still evaluate are dropped
    /// from memory on the way; the durable log keeps them.
    pub fn recompute_totals(&self) -> SpendTotals {
        let now = self.clock.now();
        let today = BudgetPeriod::Daily.start_of(now);
        let week = BudgetPeriod::Weekly.start_of(now);
        let month = BudgetPeriod::Monthly.start_of(now);
        let year = BudgetPeriod::Yearly.start_of(now);

        let mut totals = SpendTotals {
            computed_at: Some(now),
            ..SpendTotals::default()
        };
        let mut state = self.state.lock();
        let retained_from = retention_start(now);
        let before = state.entries.len();
        state.entries.retain(|e| e.timestamp >= retained_from);
        let pruned = before - state.entries.len();
        if pruned > 0 {
            info!(pruned, retained_from = %retained_from, "pruned expired cost entries");
        }
        for entry in state.entries.iter().filter(|e| e.timestamp <= now) {
            let ts = entry.timestamp;
            if ts >= today {
                totals.today += entry.total_cost;
            }
            if ts >= week {
                totals.this_week += entry.total_cost;
            }
            if ts >= month {
                totals.this_month += entry.total_cost;
            }
            if ts >= year {
                totals.this_year += entry.total_cost;
            }
        }
        state.totals = totals.clone();
        drop(state);
        debug!(today = %totals.today, this_month = %totals.this_month, "spend totals recomputed");
        totals
    }

    /// Totals from the last [`recompute_totals`](Self::recompute_totals).
    pub fn spend_totals(&self) -> SpendTotals {
        self.state.lock().totals.clone()
    }

    fn notify(&self, alert: &CostAlert) {
        let callbacks = self.callbacks.read().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    callback = index,
                    alert_id = %alert.id,
                    error = %e,
                    "alert callback failed"
                ),
                Err(_) => error!(callback = index, alert_id = %alert.id, "alert callback panicked"),
            }
        }
    }

    fn persist<F>(&self, what: &str, write: F)
    where
        F: FnOnce(&mut dyn CostStore) -> Result<(), StoreError>,
    {
        let Some(store) = &self.store else {
            return;
        };
        let mut guard = store.lock();
        if let Err(e) = write(guard.as_mut()) {
            error!(record = what, error = %e, "cost store write failed");
        }
    }
}

/// Earliest instant any budget period containing `now` can start at.
///
/// A week that began in the previous year starts before the year does.
fn retention_start(now: DateTime<Utc>) -> DateTime<Utc> {
    BudgetPeriod::Yearly
        .start_of(now)
        .min(BudgetPeriod::Weekly.start_of(now))
}

fn materialize(
    rule: &BudgetRule,
    threshold: Decimal,
    spend: Decimal,
    period_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CostAlert {
    let severity = AlertSeverity::for_threshold(threshold);
    let percent = (threshold * Decimal::ONE_HUNDRED).normalize();
    CostAlert {
        id: generate_id("alert"),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        threshold,
        severity,
        message: format!(
            "Budget '{}' reached {percent}% of its {} cap: spent {} of {}",
            rule.name, rule.period, spend, rule.cap
        ),
        spend,
        cap: rule.cap,
        period_start,
        triggered_at: now,
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
    }
}

fn log_alert(alert: &CostAlert) {
    match alert.severity {
        AlertSeverity::Critical | AlertSeverity::Emergency => error!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            severity = %alert.severity,
            spend = %alert.spend,
            cap = %alert.cap,
            "{}",
            alert.message
        ),
        AlertSeverity::Info | AlertSeverity::Warning => warn!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            severity = %alert.severity,
            spend = %alert.spend,
            cap = %alert.cap,
            "{}",
            alert.message
        ),
    }
}
