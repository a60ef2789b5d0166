//! Per-provider pricing.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::BudgetConfig;

const UNITS_PER_RATE: u64 = 1000;

/// Price of one provider resource, per 1000 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRate {
    /// Price per 1000 input-class units.
    pub input_per_1k: Decimal,
    /// Price per 1000 output-class units.
    pub output_per_1k: Decimal,
}

impl ModelRate {
    /// Rate from per-1k prices.
    pub const fn new(input_per_1k: Decimal, output_per_1k: Decimal) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

/// Result of pricing one usage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    /// Cost of the input units.
    pub input_cost: Decimal,
    /// Cost of the output units.
    pub output_cost: Decimal,
    /// `input_cost + output_cost`.
    pub total_cost: Decimal,
    /// Whether the fallback rate was applied.
    pub fallback: bool,
}

/// Rates keyed by provider and resource class, with a fallback for unknown
/// pairs. Keys are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    rates: HashMap<(String, String), ModelRate>,
    fallback: ModelRate,
}

impl RateTable {
    /// Empty table using `fallback` for every lookup.
    pub fn new(fallback: ModelRate) -> Self {
        Self {
            rates: HashMap::new(),
            fallback,
        }
    }

    /// Table seeded with list prices for common LLM providers.
    pub fn builtin(fallback: ModelRate) -> Self {
        let mut table = Self::new(fallback);
        let list: [(&str, &str, i64, i64, u32); 10] = [
            ("openai", "gpt-4o", 25, 100, 4),
            ("openai", "gpt-4o-mini", 15, 60, 5),
            ("openai", "gpt-4-turbo", 1, 3, 2),
            ("openai", "gpt-3.5-turbo", 5, 15, 4),
            ("anthropic", "claude-3-5-sonnet", 3, 15, 3),
            ("anthropic", "claude-3-opus", 15, 75, 3),
            ("anthropic", "claude-3-haiku", 25, 125, 5),
            ("google", "gemini-1.5-pro", 125, 500, 5),
            ("google", "gemini-1.5-flash", 75, 300, 6),
            ("mistral", "mistral-large", 2, 6, 3),
        ];
        for (provider, class, input, output, scale) in list {
            table.set_rate(
                provider,
                class,
                ModelRate::new(Decimal::new(input, scale), Decimal::new(output, scale)),
            );
        }
        table
    }

    /// Built-in table with the fallback and overrides from `config`.
    pub fn from_config(config: &BudgetConfig) -> Self {
        let mut table = Self::builtin(ModelRate::new(
            config.fallback_input_per_1k,
            config.fallback_output_per_1k,
        ));
        for rate in &config.rates {
            table.set_rate(
                &rate.provider,
                &rate.resource_class,
                ModelRate::new(rate.input_per_1k, rate.output_per_1k),
            );
        }
        table
    }

    /// Insert or replace a rate.
    pub fn set_rate(&mut self, provider: &str, resource_class: &str, rate: ModelRate) {
        self.rates.insert(key(provider, resource_class), rate);
    }

    /// Known rate for a pair.
    pub fn get(&self, provider: &str, resource_class: &str) -> Option<ModelRate> {
        self.rates.get(&key(provider, resource_class)).copied()
    }

    /// Rate applied to unknown pairs.
    pub const fn fallback(&self) -> ModelRate {
        self.fallback
    }

    /// Number of known pairs.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Whether no pair is known.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Price a usage report: `units / 1000 × rate` for each side, exactly.
    pub fn price(
        &self,
        provider: &str,
        resource_class: &str,
        input_units: u64,
        output_units: u64,
    ) -> Pricing {
        let (rate, fallback) = match self.get(provider, resource_class) {
            Some(rate) => (rate, false),
            None => (self.fallback, true),
        };
        let per = Decimal::from(UNITS_PER_RATE);
        let input_cost = Decimal::from(input_units) * rate.input_per_1k / per;
        let output_cost = Decimal::from(output_units) * rate.output_per_1k / per;
        Pricing {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            fallback,
        }
    }
}

fn key(provider: &str, resource_class: &str) -> (String, String) {
    (
        provider.to_ascii_lowercase(),
        resource_class.to_ascii_lowercase(),
    )
}
