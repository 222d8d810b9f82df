//! Token and cost estimation.
//!
//! Token counts come from the backend's own usage report when available;
//! this module provides the local fallback estimator plus the cost math
//! shared by the budget guard and the dispatcher. All currency values are
//! USD rounded to 6 decimal places.

use tollgate_types::llm::Usage;
use tollgate_types::provider::ModelPricing;

/// Pricing lookup for a provider/model pair.
///
/// The default table and config.toml overrides live in tollgate-infra;
/// tests use constant implementations.
pub trait PricingSource: Send + Sync {
    fn pricing(&self, provider: &str, model: &str) -> ModelPricing;
}

/// Fixed pricing for every lookup. Used by tests and local backends.
pub struct FlatPricing(pub ModelPricing);

impl PricingSource for FlatPricing {
    fn pricing(&self, _provider: &str, _model: &str) -> ModelPricing {
        self.0
    }
}

/// Estimate the token count of a text locally.
///
/// Rough heuristic: one token per four characters, rounded up, with a
/// floor of one token for non-empty text. Only used when the backend did
/// not report usage, or for pre-flight cost estimates.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    (chars as u32).div_ceil(4).max(1)
}

/// Compute the actual cost of a completed call, rounded to 6 decimals.
pub fn compute_cost(usage: Usage, pricing: ModelPricing) -> f64 {
    let input = usage.input_tokens as f64 / 1_000_000.0 * pricing.input_cost_per_million;
    let output = usage.output_tokens as f64 / 1_000_000.0 * pricing.output_cost_per_million;
    round6(input + output)
}

/// Pre-flight cost projection for a prompt and requested `max_tokens`.
///
/// Conservative: the full `max_tokens` is priced as output and the result
/// is rounded up, so the reservation never undershoots the actual cost.
pub fn estimate_cost(prompt: &str, max_tokens: u32, pricing: ModelPricing) -> f64 {
    let usage = Usage {
        input_tokens: estimate_tokens(prompt),
        output_tokens: max_tokens,
    };
    let input = usage.input_tokens as f64 / 1_000_000.0 * pricing.input_cost_per_million;
    let output = usage.output_tokens as f64 / 1_000_000.0 * pricing.output_cost_per_million;
    ceil6(input + output)
}

/// Round to 6 decimal currency units.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Round up to 6 decimal currency units.
pub fn ceil6(value: f64) -> f64 {
    (value * 1_000_000.0).ceil() / 1_000_000.0
}

/// Format a cost as a human-readable estimate string.
///
/// Always prefixed with `~` to signal the value is approximate.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("~${cost:.3}")
    } else {
        format!("~${cost:.2}")
    }
}
