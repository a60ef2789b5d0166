//! Configuration models for the executor, ledger, and budget subsystems.

pub mod budget;
pub mod executor;
pub mod governor;

pub use budget::{BudgetConfig, RateConfig};
pub use executor::ExecutorConfig;
pub use governor::{GovernorConfig, LedgerConfig};
