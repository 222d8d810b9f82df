//! Pricing catalog for known providers and models.
//!
//! Lookup order: user overrides from `tollgate.toml`, then the built-in
//! table, then a conservative fallback. Model patterns are prefixes, so
//! `"claude-sonnet-4"` matches `"claude-sonnet-4-20250514"`. Ollama
//! providers always price at zero (local inference).

use tollgate_core::estimate::PricingSource;
use tollgate_types::config::PricingOverride;
use tollgate_types::provider::ModelPricing;

/// Conservative fallback, applied when nothing matches.
const FALLBACK: ModelPricing = ModelPricing {
    input_cost_per_million: 5.0,
    output_cost_per_million: 15.0,
};

struct CatalogEntry {
    provider: &'static str,
    model_pattern: &'static str,
    pricing: ModelPricing,
}

/// Built-in pricing, approximate USD per million tokens as of early 2026.
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        provider: "anthropic",
        model_pattern: "claude-sonnet-4",
        pricing: ModelPricing {
            input_cost_per_million: 3.0,
            output_cost_per_million: 15.0,
        },
    },
    CatalogEntry {
        provider: "anthropic",
        model_pattern: "claude-opus-4",
        pricing: ModelPricing {
            input_cost_per_million: 15.0,
            output_cost_per_million: 75.0,
        },
    },
    CatalogEntry {
        provider: "anthropic",
        model_pattern: "claude-haiku-3",
        pricing: ModelPricing {
            input_cost_per_million: 0.25,
            output_cost_per_million: 1.25,
        },
    },
    CatalogEntry {
        provider: "openai",
        model_pattern: "gpt-4o-mini",
        pricing: ModelPricing {
            input_cost_per_million: 0.15,
            output_cost_per_million: 0.60,
        },
    },
    CatalogEntry {
        provider: "openai",
        model_pattern: "gpt-4o",
        pricing: ModelPricing {
            input_cost_per_million: 2.50,
            output_cost_per_million: 10.0,
        },
    },
    CatalogEntry {
        provider: "mistral",
        model_pattern: "mistral-large",
        pricing: ModelPricing {
            input_cost_per_million: 2.0,
            output_cost_per_million: 6.0,
        },
    },
];

fn matches_pattern(model: &str, pattern: &str) -> bool {
    model.starts_with(pattern)
}

/// `PricingSource` backed by the built-in catalog plus config overrides.
pub struct CatalogPricing {
    overrides: Vec<PricingOverride>,
    /// Providers that always price at zero, regardless of model.
    free_providers: Vec<String>,
}

impl CatalogPricing {
    pub fn new(overrides: Vec<PricingOverride>, free_providers: Vec<String>) -> Self {
        Self {
            overrides,
            free_providers,
        }
    }
}

impl PricingSource for CatalogPricing {
    fn pricing(&self, provider: &str, model: &str) -> ModelPricing {
        if self.free_providers.iter().any(|p| p == provider) {
            return ModelPricing::free();
        }

        for entry in &self.overrides {
            if entry.provider == provider && matches_pattern(model, &entry.model_pattern) {
                return ModelPricing {
                    input_cost_per_million: entry.input_cost_per_million,
                    output_cost_per_million: entry.output_cost_per_million,
                };
            }
        }

        for entry in CATALOG {
            if entry.provider == provider && matches_pattern(model, entry.model_pattern) {
                return entry.pricing;
            }
        }

        FALLBACK
    }
}
