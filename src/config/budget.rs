//! Budget governance configuration.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price override for one provider/resource-class pair, per 1000 units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Provider tag, e.g. `"openai"`.
    pub provider: String,
    /// Resource class, e.g. a model name.
    pub resource_class: String,
    /// Price per 1000 input-class units.
    pub input_per_1k: Decimal,
    /// Price per 1000 output-class units.
    pub output_per_1k: Decimal,
}

/// Configuration for cost metering and budget evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Seconds between threshold evaluation cycles.
    pub evaluation_interval_secs: u64,
    /// Seconds between rolling-total recomputations.
    pub rollup_interval_secs: u64,
    /// Input price applied to unknown provider/resource-class pairs.
    pub fallback_input_per_1k: Decimal,
    /// Output price applied to unknown provider/resource-class pairs.
    pub fallback_output_per_1k: Decimal,
    /// Rates layered over the built-in table.
    pub rates: Vec<RateConfig>,
    /// Directory for JSON-lines cost, rule, and alert logs.
    pub store_dir: Option<PathBuf>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            rollup_interval_secs: 300,
            fallback_input_per_1k: Decimal::new(1, 2),
            fallback_output_per_1k: Decimal::new(3, 2),
            rates: Vec::new(),
            store_dir: None,
        }
    }
}

impl BudgetConfig {
    /// Evaluation cadence.
    pub const fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    /// Rolling-total cadence.
    pub const fn rollup_interval(&self) -> Duration {
        Duration::from_secs(self.rollup_interval_secs)
    }

    /// Validate budget configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.evaluation_interval_secs == 0 {
            return Err("evaluation_interval_secs must be greater than 0".into());
        }
        if self.rollup_interval_secs == 0 {
            return Err("rollup_interval_secs must be greater than 0".into());
        }
        if self.fallback_input_per_1k.is_sign_negative() || self.fallback_output_per_1k.is_sign_negative() {
            return Err("fallback rates must not be negative".into());
        }
        for rate in &self.rates {
            if rate.provider.is_empty() || rate.resource_class.is_empty() {
                return Err("rate provider and resource_class must not be empty".into());
            }
            if rate.input_per_1k.is_sign_negative() || rate.output_per_1k.is_sign_negative() {
                return Err(format!(
                    "rate `{}/{}` must not be negative",
                    rate.provider, rate.resource_class
                ));
            }
        }
        Ok(())
    }
}
