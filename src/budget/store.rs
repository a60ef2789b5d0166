//! Durable storage seam for cost entries, rules, and alerts.

use serde::{Deserialize, Serialize};

use crate::budget::types::{BudgetRule, CostAlert, CostEntry};
use crate::core::error::StoreError;

/// State recovered from a store on startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSnapshot {
    /// Cost entries in append order.
    pub entries: Vec<CostEntry>,
    /// Latest version of every live rule.
    pub rules: Vec<BudgetRule>,
    /// Latest version of every alert.
    pub alerts: Vec<CostAlert>,
}

/// Append-oriented persistence for the cost tracker.
///
/// Writes happen outside the tracker's lock. A failed write is logged by the
/// caller and in-memory state still advances.
pub trait CostStore: Send {
    /// Append one cost entry.
    fn append_entry(&mut self, entry: &CostEntry) -> Result<(), StoreError>;

    /// Insert or replace a rule.
    fn save_rule(&mut self, rule: &BudgetRule) -> Result<(), StoreError>;

    /// Remove a rule.
    fn delete_rule(&mut self, rule_id: &str) -> Result<(), StoreError>;

    /// Insert or replace an alert.
    fn save_alert(&mut self, alert: &CostAlert) -> Result<(), StoreError>;

    /// Everything persisted so far.
    fn load(&self) -> Result<CostSnapshot, StoreError>;
}
