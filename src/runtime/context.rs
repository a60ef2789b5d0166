//! Process-wide governor context.
//!
//! One context is built at process start and handed to whatever needs the
//! executor, ledger, or cost tracker. There is no global accessor.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::budget::{BudgetMonitor, CostTracker};
use crate::builders::GovernorBuilder;
use crate::config::GovernorConfig;
use crate::core::{AppResult, ExecutionLedger, TaskExecutor};
use crate::util::telemetry::init_tracing;

/// Owns the executor, the ledger, the cost tracker, and the budget loops.
pub struct GovernorContext {
    config: GovernorConfig,
    ledger: Arc<ExecutionLedger>,
    executor: Arc<TaskExecutor>,
    tracker: Arc<CostTracker>,
    monitor: Mutex<Option<BudgetMonitor>>,
}

impl GovernorContext {
    /// Build every component from `config` and start the budget loops.
    ///
    /// # Errors
    ///
    /// See [`GovernorBuilder::build`].
    pub fn new(config: GovernorConfig) -> AppResult<Self> {
        GovernorBuilder::new(config).build()
    }

    /// Install the default tracing subscriber and build from `GOVERNOR_*`
    /// environment configuration.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or invalid configuration, or startup failures.
    pub fn from_env() -> AppResult<Self> {
        init_tracing();
        Self::new(GovernorConfig::from_env()?)
    }

    pub(crate) fn from_parts(
        config: GovernorConfig,
        ledger: Arc<ExecutionLedger>,
        executor: Arc<TaskExecutor>,
        tracker: Arc<CostTracker>,
        monitor: Option<BudgetMonitor>,
    ) -> Self {
        Self {
            config,
            ledger,
            executor,
            tracker,
            monitor: Mutex::new(monitor),
        }
    }

    /// Configuration the context was built from.
    pub const fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Execution ledger.
    pub const fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }

    /// Task executor.
    pub const fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Cost tracker.
    pub const fn tracker(&self) -> &Arc<CostTracker> {
        &self.tracker
    }

    /// Whether the budget loops are running.
    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(BudgetMonitor::is_running)
    }

    /// Stop the budget loops (joined) and then the executor.
    ///
    /// With `wait`, also blocks until in-flight work drains. Idempotent.
    pub fn shutdown(&self, wait: bool) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        if self.executor.is_accepting() {
            info!(wait, "governor context shutting down");
        }
        self.executor.shutdown(wait);
    }
}

impl Drop for GovernorContext {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}
