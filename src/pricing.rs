//! Model pricing tables
//!
//! Per-model token pricing used by the analyzer to turn token counts into
//! dollar costs. Pricing is stored per-million tokens internally; the
//! constructors accept either the traditional per-1K or the modern per-1M
//! form.
//!
//! Tables are plain values, constructed explicitly and injected into the
//! session that uses them. Nothing here is process-global, so concurrent
//! sessions can run against different pricing assumptions.
//!
//! # Example
//!
//! ```
//! use chainlens::pricing::{Pricing, PricingTable};
//!
//! let table = PricingTable::new()
//!     .with_model("gpt-4", Pricing::per_1k(0.03, 0.06))
//!     .with_model("gpt-4o", Pricing::per_1m(2.50, 10.00));
//!
//! let pricing = table.resolve("gpt-4-0613").unwrap();
//! let cost = pricing.cost(1500, 800);
//! assert!((cost - 0.093).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pricing for a single model: prompt and completion token rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Cost per 1,000,000 prompt tokens
    prompt_per_million: f64,
    /// Cost per 1,000,000 completion tokens
    completion_per_million: f64,
}

impl Pricing {
    /// Create pricing from per-1K token rates (traditional form).
    #[must_use]
    pub fn per_1k(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_million: prompt_per_1k * 1000.0,
            completion_per_million: completion_per_1k * 1000.0,
        }
    }

    /// Create pricing from per-1M token rates (modern provider form).
    #[must_use]
    pub fn per_1m(prompt_per_million: f64, completion_per_million: f64) -> Self {
        Self {
            prompt_per_million,
            completion_per_million,
        }
    }

    /// Create pricing from per-token rates.
    #[must_use]
    pub fn per_token(prompt_rate: f64, completion_rate: f64) -> Self {
        Self {
            prompt_per_million: prompt_rate * 1_000_000.0,
            completion_per_million: completion_rate * 1_000_000.0,
        }
    }

    /// Prompt token rate per single token.
    #[must_use]
    pub fn prompt_rate(&self) -> f64 {
        self.prompt_per_million / 1_000_000.0
    }

    /// Completion token rate per single token.
    #[must_use]
    pub fn completion_rate(&self) -> f64 {
        self.completion_per_million / 1_000_000.0
    }

    /// Dollar cost for the given prompt and completion token counts.
    #[must_use]
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let prompt_cost = (prompt_tokens as f64 / 1_000_000.0) * self.prompt_per_million;
        let completion_cost =
            (completion_tokens as f64 / 1_000_000.0) * self.completion_per_million;
        prompt_cost + completion_cost
    }
}

/// Read-only mapping from model identifier to [`Pricing`].
///
/// Lookup first tries an exact match, then falls back to substring matching
/// so that dated or versioned identifiers ("gpt-4-0613",
/// "claude-3-opus-20240229") resolve to their base entry. A miss is a
/// recoverable condition for callers, never a table-load failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    models: HashMap<String, Pricing>,
}

impl PricingTable {
    /// Create an empty pricing table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace pricing for a model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, pricing: Pricing) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    /// Exact-match lookup.
    #[must_use]
    pub fn get(&self, model: &str) -> Option<&Pricing> {
        self.models.get(model)
    }

    /// Resolve a model identifier to pricing, tolerating versioned names.
    ///
    /// Exact match wins; otherwise the longest table key contained in the
    /// identifier is used, so "gpt-4-turbo-2024-04-09" resolves to
    /// "gpt-4-turbo" rather than "gpt-4".
    #[must_use]
    pub fn resolve(&self, model: &str) -> Option<&Pricing> {
        if let Some(pricing) = self.models.get(model) {
            return Some(pricing);
        }

        let model_lower = model.to_lowercase();
        self.models
            .iter()
            .filter(|(key, _)| model_lower.contains(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, pricing)| pricing)
    }

    /// Number of models in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All model identifiers in the table, sorted.
    #[must_use]
    pub fn models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Default table covering common OpenAI and Anthropic models.
    ///
    /// Per-1K rates as of 2024.
    #[must_use]
    pub fn defaults() -> Self {
        Self::new()
            .with_model("gpt-4", Pricing::per_1k(0.03, 0.06))
            .with_model("gpt-4-turbo", Pricing::per_1k(0.01, 0.03))
            .with_model("gpt-3.5-turbo", Pricing::per_1k(0.0005, 0.0015))
            .with_model("gpt-3.5-turbo-instruct", Pricing::per_1k(0.0015, 0.002))
            .with_model("claude-3-opus", Pricing::per_1k(0.015, 0.075))
            .with_model("claude-3-sonnet", Pricing::per_1k(0.003, 0.015))
            .with_model("claude-3-haiku", Pricing::per_1k(0.00025, 0.00125))
            .with_model("claude-sonnet-4", Pricing::per_1k(0.003, 0.015))
    }
}
