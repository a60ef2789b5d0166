//! Builders to construct governor components from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::budget::{BudgetMonitor, CostStore, CostTracker, RateTable};
use crate::config::{BudgetConfig, ExecutorConfig, GovernorConfig, LedgerConfig};
use crate::core::{AppResult, ExecutionLedger, ExecutionStore, TaskExecutor};
use crate::infra::{JsonlCostStore, JsonlExecutionStore};
use crate::runtime::GovernorContext;
use crate::util::clock::{Clock, SystemClock};

/// Build the execution ledger, attaching a JSON-lines store when
/// `store_path` is set.
///
/// # Errors
///
/// Fails when the store file cannot be opened.
pub fn build_ledger(cfg: &LedgerConfig) -> AppResult<ExecutionLedger> {
    let ledger = ExecutionLedger::new(cfg.history_capacity);
    match &cfg.store_path {
        Some(path) => {
            let store = JsonlExecutionStore::open(path)
                .with_context(|| format!("opening execution store {}", path.display()))?;
            Ok(ledger.with_store(Box::new(store)))
        }
        None => Ok(ledger),
    }
}

/// Build the cost tracker, restoring from a JSON-lines store in `store_dir`
/// when set.
///
/// # Errors
///
/// Fails when the store cannot be opened or replayed.
pub fn build_tracker(cfg: &BudgetConfig, clock: Arc<dyn Clock>) -> AppResult<CostTracker> {
    let tracker = CostTracker::new(RateTable::from_config(cfg)).with_clock(clock);
    match &cfg.store_dir {
        Some(dir) => {
            let store = JsonlCostStore::open(dir)
                .with_context(|| format!("opening cost store {}", dir.display()))?;
            Ok(tracker.with_store(Box::new(store))?)
        }
        None => Ok(tracker),
    }
}

/// Start an executor over `ledger`.
///
/// # Errors
///
/// Fails when the configuration is invalid or workers cannot be spawned.
pub fn build_executor(cfg: &ExecutorConfig, ledger: Arc<ExecutionLedger>) -> AppResult<TaskExecutor> {
    TaskExecutor::new(cfg.clone(), ledger).map_err(|e| anyhow::anyhow!("starting executor: {e}"))
}

/// Assembles a [`GovernorContext`], with seams for tests and embedders.
pub struct GovernorBuilder {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    execution_store: Option<Box<dyn ExecutionStore>>,
    cost_store: Option<Box<dyn CostStore>>,
    monitor: bool,
}

impl GovernorBuilder {
    /// Builder for `config` on the system clock with background loops on.
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            execution_store: None,
            cost_store: None,
            monitor: true,
        }
    }

    /// Read budget time from `clock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `store` instead of the configured execution store.
    #[must_use]
    pub fn execution_store(mut self, store: Box<dyn ExecutionStore>) -> Self {
        self.execution_store = Some(store);
        self
    }

    /// Use `store` instead of the configured cost store.
    #[must_use]
    pub fn cost_store(mut self, store: Box<dyn CostStore>) -> Self {
        self.cost_store = Some(store);
        self
    }

    /// Whether to start the evaluation and rollup loops.
    #[must_use]
    pub const fn monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }

    /// Validate the configuration and start every component.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, unopenable stores, or spawn failures.
    pub fn build(self) -> AppResult<GovernorContext> {
        self.config.validate()?;
        let cfg = &self.config;

        let ledger = match self.execution_store {
            Some(store) => ExecutionLedger::new(cfg.ledger.history_capacity).with_store(store),
            None => build_ledger(&cfg.ledger)?,
        };
        let ledger = Arc::new(ledger);

        let tracker = match self.cost_store {
            Some(store) => CostTracker::new(RateTable::from_config(&cfg.budget))
                .with_clock(Arc::clone(&self.clock))
                .with_store(store)?,
            None => build_tracker(&cfg.budget, Arc::clone(&self.clock))?,
        };
        let tracker = Arc::new(tracker);

        let executor = Arc::new(build_executor(&cfg.executor, Arc::clone(&ledger))?);

        let monitor = if self.monitor {
            Some(
                BudgetMonitor::start(
                    Arc::clone(&tracker),
                    cfg.budget.evaluation_interval(),
                    cfg.budget.rollup_interval(),
                )
                .context("starting budget monitor")?,
            )
        } else {
            None
        };

        info!(
            workers = cfg.executor.worker_count,
            max_in_flight = cfg.executor.max_in_flight,
            monitor = monitor.is_some(),
            "governor context ready"
        );
        Ok(GovernorContext::from_parts(
            self.config,
            ledger,
            executor,
            tracker,
            monitor,
        ))
    }
}
