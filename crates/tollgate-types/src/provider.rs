//! Provider configuration and status types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend kind for a provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    Ollama,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::OpenAiCompatible => write!(f, "openai_compatible"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai_compatible" => Ok(ProviderKind::OpenAiCompatible),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(format!("invalid provider kind: '{other}'")),
        }
    }
}

/// Per-million-token pricing for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl ModelPricing {
    /// Zero-cost pricing, used for local inference backends.
    pub fn free() -> Self {
        Self {
            input_cost_per_million: 0.0,
            output_cost_per_million: 0.0,
        }
    }
}

/// Static configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Registry key (e.g., "anthropic", "openai", "local").
    pub name: String,
    /// Which adapter implementation serves this provider.
    pub kind: ProviderKind,
    /// Environment variable holding the API key, if one is required.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Override the adapter's default base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model used when the request does not name one.
    pub default_model: String,
    /// Daily spend ceiling in USD.
    #[serde(default = "default_daily_cost_limit")]
    pub daily_cost_limit: f64,
    /// Maximum concurrent in-flight calls to this provider.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Whether this provider accepts traffic.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_daily_cost_limit() -> f64 {
    10.0
}

fn default_max_in_flight() -> usize {
    8
}

fn default_enabled() -> bool {
    true
}

/// Live status of a provider, merged from configuration, budget guard,
/// circuit breaker, and health monitor state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub is_enabled: bool,
    pub is_healthy: bool,
    pub api_key_configured: bool,
    pub default_model: String,
    pub current_daily_cost: f64,
    pub daily_cost_limit: f64,
    /// One of "closed", "open", "half_open".
    pub circuit_state: String,
    pub total_calls: u64,
    pub total_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
