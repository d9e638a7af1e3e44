//! Resource usage estimation and cost accounting.

use evidence::ResourceUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::backend::Usage;

/// Estimate units consumed by `text`.
///
/// `max(ceil(chars / 4), ceil(words * 1.3))`.
pub fn estimate_units(text: &str) -> u32 {
    let chars = text.chars().count() as u64;
    let words = text.split_whitespace().count() as u64;

    let by_chars = chars.div_ceil(4);
    let by_words = (words * 13).div_ceil(10);
    by_chars.max(by_words).min(u32::MAX as u64) as u32
}

/// Price per unit for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    /// Cost per input unit
    pub input: f64,
    /// Cost per output unit
    pub output: f64,
}

impl ModelRate {
    /// Rate from per-million-unit prices.
    pub fn per_million(input: f64, output: f64) -> Self {
        Self {
            input: input / 1_000_000.0,
            output: output / 1_000_000.0,
        }
    }
}

/// Per-model rate table with an optional fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    /// Rates keyed by model id
    #[serde(default)]
    pub models: HashMap<String, ModelRate>,
    /// Rate for models not listed
    #[serde(default)]
    pub default: Option<ModelRate>,
}

impl RateTable {
    /// Add a model rate.
    pub fn with_model(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        self.models.insert(model.into(), rate);
        self
    }

    /// Set the fallback rate.
    pub fn with_default(mut self, rate: ModelRate) -> Self {
        self.default = Some(rate);
        self
    }

    /// Rate for a model, falling back to the default.
    pub fn rate_for(&self, model: &str) -> Option<ModelRate> {
        self.models.get(model).copied().or(self.default)
    }

    /// Cost of a call. Unknown models with no default cost nothing.
    pub fn cost(&self, model: &str, input_units: u32, output_units: u32) -> f64 {
        match self.rate_for(model) {
            Some(rate) => input_units as f64 * rate.input + output_units as f64 * rate.output,
            None => {
                debug!(model = %model, "No rate configured for model, cost recorded as 0");
                0.0
            }
        }
    }
}

/// Build the usage block for an audit trail.
///
/// Measured counts take precedence; otherwise both sides are estimated
/// from the input text and the serialized output.
pub fn account(
    rates: &RateTable,
    model: &str,
    input: &str,
    output: &str,
    measured: Option<Usage>,
) -> ResourceUsage {
    let (input_units, output_units, measured) = match measured {
        Some(usage) => (usage.input_units, usage.output_units, true),
        None => (estimate_units(input), estimate_units(output), false),
    };

    ResourceUsage {
        input_units,
        output_units,
        measured,
        cost: rates.cost(model, input_units, output_units),
    }
}
