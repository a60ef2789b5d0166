//! Budget governance: cost metering, rules, alerts, and background evaluation.

pub mod monitor;
pub mod period;
pub mod rates;
pub mod store;
pub mod tracker;
pub mod types;

pub use monitor::BudgetMonitor;
pub use period::BudgetPeriod;
pub use rates::{ModelRate, Pricing, RateTable};
pub use store::{CostSnapshot, CostStore};
pub use tracker::{AlertCallback, CostTracker};
pub use types::{
    AlertFilter, AlertSeverity, BudgetRule, BudgetScope, BudgetStatus, CostAlert, CostEntry,
    CostSummary, NewBudgetRule, SpendTotals, Usage,
};
