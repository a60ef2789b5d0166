//! Root configuration and loading from JSON or the environment.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::{BudgetConfig, ExecutorConfig};
use crate::core::error::{AppResult, ConfigError};
use crate::core::ledger::DEFAULT_HISTORY_CAPACITY;

/// Execution ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Terminal records retained in the rolling history.
    pub history_capacity: usize,
    /// JSON-lines file receiving execution snapshots.
    pub store_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            store_path: None,
        }
    }
}

/// Root configuration for a governor process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Executor settings.
    pub executor: ExecutorConfig,
    /// Ledger settings.
    pub ledger: LedgerConfig,
    /// Budget settings.
    pub budget: BudgetConfig,
}

impl GovernorConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("executor: {e}")))?;
        if self.ledger.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ledger: history_capacity must be greater than 0".into(),
            ));
        }
        self.budget
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("budget: {e}")))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment.
    ///
    /// A `.env` file is read first when present. `GOVERNOR_CONFIG_FILE` names
    /// an optional JSON base file; individual `GOVERNOR_*` variables override
    /// it.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let base = match std::env::var("GOVERNOR_CONFIG_FILE") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                Self::from_json_str(&raw)?
            }
            Err(_) => Self::default(),
        };
        let cfg = base.with_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `GOVERNOR_*` overrides from `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "GOVERNOR_WORKER_COUNT")? {
            self.executor.worker_count = v;
        }
        if let Some(v) = parse_var(&lookup, "GOVERNOR_MAX_IN_FLIGHT")? {
            self.executor.max_in_flight = v;
        }
        if let Some(v) = parse_var(&lookup, "GOVERNOR_MAX_QUEUE_DEPTH")? {
            self.executor.max_queue_depth = v;
        }
        if let Some(v) = parse_var(&lookup, "GOVERNOR_DEFAULT_TIMEOUT_SECS")? {
            self.executor.default_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "GOVERNOR_HISTORY_CAPACITY")? {
            self.ledger.history_capacity = v;
        }
        if let Some(v) = lookup("GOVERNOR_LEDGER_STORE_PATH") {
            self.ledger.store_path = Some(PathBuf::from(v));
        }
        if let Some(v) = parse_var(&lookup, "GOVERNOR_EVALUATION_INTERVAL_SECS")? {
            self.budget.evaluation_interval_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "GOVERNOR_ROLLUP_INTERVAL_SECS")? {
            self.budget.rollup_interval_secs = v;
        }
        if let Some(v) = lookup("GOVERNOR_BUDGET_STORE_DIR") {
            self.budget.store_dir = Some(PathBuf::from(v));
        }
        Ok(self)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::Parse(format!("{key}={raw}: {e}")))
        })
        .transpose()
}
