//! Cost entries, budget rules, and alerts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::budget::period::BudgetPeriod;
use crate::util::serde::Scope;

/// One metered, priced unit of externally billed consumption.
///
/// Costs are computed once at write time and never repriced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEntry {
    /// Entry identifier.
    pub id: String,
    /// When the consumption was recorded.
    pub timestamp: DateTime<Utc>,
    /// Provider tag, e.g. `"openai"`.
    pub provider: String,
    /// Resource class within the provider, usually a model name.
    pub resource_class: String,
    /// Organization and user tags.
    pub scope: Scope,
    /// Task class that incurred the cost, if known.
    pub task_class: Option<String>,
    /// Input-class units, e.g. prompt tokens.
    pub input_units: u64,
    /// Output-class units, e.g. completion tokens.
    pub output_units: u64,
    /// Cost of the input units.
    pub input_cost: Decimal,
    /// Cost of the output units.
    pub output_cost: Decimal,
    /// `input_cost + output_cost`.
    pub total_cost: Decimal,
    /// Whether the fallback rate priced this entry.
    pub fallback_rate: bool,
    /// Free-form annotations.
    pub metadata: Map<String, Value>,
}

/// Consumption report submitted by a cost emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    /// Provider tag.
    pub provider: String,
    /// Resource class.
    pub resource_class: String,
    /// Organization and user tags.
    pub scope: Scope,
    /// Task class that incurred the cost.
    pub task_class: Option<String>,
    /// Input-class units.
    pub input_units: u64,
    /// Output-class units.
    pub output_units: u64,
    /// Free-form annotations.
    pub metadata: Map<String, Value>,
}

impl Usage {
    /// Usage of `input_units` and `output_units` on a provider resource.
    pub fn new(
        provider: impl Into<String>,
        resource_class: impl Into<String>,
        input_units: u64,
        output_units: u64,
    ) -> Self {
        Self {
            provider: provider.into(),
            resource_class: resource_class.into(),
            input_units,
            output_units,
            ..Self::default()
        }
    }

    /// Attribute the usage to a scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Attribute the usage to a task class.
    #[must_use]
    pub fn with_task_class(mut self, task_class: impl Into<String>) -> Self {
        self.task_class = Some(task_class.into());
        self
    }

    /// Attach one metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What a budget rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BudgetScope {
    /// All spend.
    Global,
    /// Spend tagged with one organization.
    Organization(String),
    /// Spend incurred by one task class.
    TaskClass(String),
    /// Spend tagged with one user.
    User(String),
}

impl BudgetScope {
    /// Whether `entry` counts toward this scope.
    pub fn matches(&self, entry: &CostEntry) -> bool {
        match self {
            Self::Global => true,
            Self::Organization(org) => entry.scope.organization.as_deref() == Some(org.as_str()),
            Self::TaskClass(class) => entry.task_class.as_deref() == Some(class.as_str()),
            Self::User(user) => entry.scope.user.as_deref() == Some(user.as_str()),
        }
    }
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Organization(id) => write!(f, "organization:{id}"),
            Self::TaskClass(id) => write!(f, "task_class:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// A recurring spending cap with ordered alert thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRule {
    /// Rule identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Recurrence.
    pub period: BudgetPeriod,
    /// Monetary cap per period.
    pub cap: Decimal,
    /// Fractions of the cap, sorted ascending.
    pub thresholds: Vec<Decimal>,
    /// What spend counts toward the cap.
    pub scope: BudgetScope,
    /// Disabled rules are skipped by evaluation.
    pub enabled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Definition of a budget rule to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBudgetRule {
    /// Human-readable name.
    pub name: String,
    /// Recurrence.
    pub period: BudgetPeriod,
    /// Monetary cap per period.
    pub cap: Decimal,
    /// Fractions of the cap; any order.
    pub thresholds: Vec<Decimal>,
    /// What spend counts toward the cap.
    pub scope: BudgetScope,
}

impl NewBudgetRule {
    /// Global rule with no thresholds yet.
    pub fn new(name: impl Into<String>, period: BudgetPeriod, cap: Decimal) -> Self {
        Self {
            name: name.into(),
            period,
            cap,
            thresholds: Vec::new(),
            scope: BudgetScope::Global,
        }
    }

    /// Set the alert thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: impl IntoIterator<Item = Decimal>) -> Self {
        self.thresholds = thresholds.into_iter().collect();
        self
    }

    /// Restrict the rule to a scope.
    #[must_use]
    pub fn with_scope(mut self, scope: BudgetScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Alert severity, fixed by the crossed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Below 70% of the cap.
    Info,
    /// At least 70%.
    Warning,
    /// At least 90%.
    Critical,
    /// Cap reached.
    Emergency,
}

impl AlertSeverity {
    /// Severity for a threshold fraction.
    pub fn for_threshold(threshold: Decimal) -> Self {
        if threshold >= Decimal::ONE {
            Self::Emergency
        } else if threshold >= Decimal::new(9, 1) {
            Self::Critical
        } else if threshold >= Decimal::new(7, 1) {
            Self::Warning
        } else {
            Self::Info
        }
    }

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A materialized threshold crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAlert {
    /// Alert identifier.
    pub id: String,
    /// Owning rule.
    pub rule_id: String,
    /// Owning rule name at trigger time.
    pub rule_name: String,
    /// Threshold fraction that was crossed.
    pub threshold: Decimal,
    /// Derived from `threshold`.
    pub severity: AlertSeverity,
    /// Human-readable description.
    pub message: String,
    /// In-period spend at trigger time.
    pub spend: Decimal,
    /// Rule cap at trigger time.
    pub cap: Decimal,
    /// Start of the period the alert belongs to.
    pub period_start: DateTime<Utc>,
    /// When the alert was raised.
    pub triggered_at: DateTime<Utc>,
    /// Whether someone acknowledged it.
    pub acknowledged: bool,
    /// Who acknowledged it.
    pub acknowledged_by: Option<String>,
    /// When it was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl CostAlert {
    /// Whether the alert suppresses a new one for the same rule and
    /// threshold in the period starting at `period_start`.
    pub fn is_active(&self, period_start: DateTime<Utc>) -> bool {
        !self.acknowledged && self.triggered_at >= period_start
    }
}

/// Selects alerts in listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    /// Only alerts of this rule.
    pub rule_id: Option<String>,
    /// Only unacknowledged alerts.
    pub unacknowledged_only: bool,
}

/// Spend aggregated over a time range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Inclusive range start.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive range end.
    pub end: Option<DateTime<Utc>>,
    /// Sum of `total_cost`.
    pub total_cost: Decimal,
    /// Sum of `input_cost`.
    pub input_cost: Decimal,
    /// Sum of `output_cost`.
    pub output_cost: Decimal,
    /// Number of entries.
    pub entry_count: usize,
    /// Sum of input units.
    pub input_units: u64,
    /// Sum of output units.
    pub output_units: u64,
    /// Total cost per provider.
    pub by_provider: BTreeMap<String, Decimal>,
    /// Total cost per `provider/resource_class`.
    pub by_model: BTreeMap<String, Decimal>,
    /// Total cost per organization; untagged spend is omitted.
    pub by_organization: BTreeMap<String, Decimal>,
    /// Total cost per task class; untagged spend is omitted.
    pub by_task_class: BTreeMap<String, Decimal>,
}

impl CostSummary {
    pub(crate) fn add(&mut self, entry: &CostEntry) {
        self.total_cost += entry.total_cost;
        self.input_cost += entry.input_cost;
        self.output_cost += entry.output_cost;
        self.entry_count += 1;
        self.input_units = self.input_units.saturating_add(entry.input_units);
        self.output_units = self.output_units.saturating_add(entry.output_units);
        *self.by_provider.entry(entry.provider.clone()).or_default() += entry.total_cost;
        *self
            .by_model
            .entry(format!("{}/{}", entry.provider, entry.resource_class))
            .or_default() += entry.total_cost;
        if let Some(org) = &entry.scope.organization {
            *self.by_organization.entry(org.clone()).or_default() += entry.total_cost;
        }
        if let Some(class) = &entry.task_class {
            *self.by_task_class.entry(class.clone()).or_default() += entry.total_cost;
        }
    }
}

/// Coarse rolling totals for dashboard reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendTotals {
    /// Spend since 00:00 UTC.
    pub today: Decimal,
    /// Spend since Monday 00:00 UTC.
    pub this_week: Decimal,
    /// Spend since the first of the month.
    pub this_month: Decimal,
    /// Spend since January 1st.
    pub this_year: Decimal,
    /// When these totals were computed.
    pub computed_at: Option<DateTime<Utc>>,
}

/// Current standing of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Rule identifier.
    pub rule_id: String,
    /// Rule name.
    pub name: String,
    /// Recurrence.
    pub period: BudgetPeriod,
    /// Start of the current period.
    pub period_start: DateTime<Utc>,
    /// Start of the next period.
    pub period_end: DateTime<Utc>,
    /// Spend in the current period.
    pub spend: Decimal,
    /// Cap.
    pub cap: Decimal,
    /// `spend / cap`; zero when the cap is zero.
    pub utilization: Decimal,
    /// `cap - spend`, floored at zero.
    pub remaining: Decimal,
    /// Whether the rule is evaluated.
    pub enabled: bool,
}
