//! Gateway configuration tree, deserialized from `config.toml`.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderSettings;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider used when a request does not name one.
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Upper bound on a single adapter call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    /// Per-model pricing overrides applied before the built-in table.
    #[serde(default)]
    pub pricing: Vec<PricingOverride>,
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Entry time-to-live, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Retry policy for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first (so 3 means up to 2 retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Circuit breaker thresholds and cooldowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Initial cooldown while open, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Cap for the exponentially extended cooldown, in seconds.
    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            max_cooldown_secs: default_max_cooldown_secs(),
        }
    }
}

/// Conversation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// System prompt folded into every chat dispatch, if set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Token budget for the trailing history window in chat prompts.
    #[serde(default = "default_history_token_budget")]
    pub history_token_budget: u32,
    /// Conversations idle longer than this are archived on next access.
    #[serde(default = "default_archive_after_secs")]
    pub archive_after_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            history_token_budget: default_history_token_budget(),
            archive_after_secs: default_archive_after_secs(),
        }
    }
}

/// User-defined pricing override from `config.toml`.
///
/// `model_pattern` is matched by prefix against the model name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverride {
    pub provider: String,
    pub model_pattern: String,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_max_cooldown_secs() -> u64 {
    300
}

fn default_history_token_budget() -> u32 {
    2000
}

fn default_archive_after_secs() -> u64 {
    86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert!(config.cache.enabled);
        assert_eq!(config.request_timeout_secs, 60);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_partial_config_parses() {
        let src = r#"
            default_provider = "anthropic"

            [retry]
            max_attempts = 5

            [[providers]]
            name = "anthropic"
            kind = "anthropic"
            api_key_env = "ANTHROPIC_API_KEY"
            default_model = "claude-sonnet-4"
            daily_cost_limit = 5.0
        "#;
        let config: GatewayConfig = toml::from_str(src).unwrap();
        assert_eq!(config.default_provider.as_deref(), Some("anthropic"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.providers.len(), 1);
        assert!((config.providers[0].daily_cost_limit - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pricing_override_parses() {
        let src = r#"
            [[pricing]]
            provider = "openai"
            model_pattern = "gpt-4o"
            input_cost_per_million = 2.5
            output_cost_per_million = 10.0
        "#;
        let config: GatewayConfig = toml::from_str(src).unwrap();
        assert_eq!(config.pricing.len(), 1);
        assert_eq!(config.pricing[0].model_pattern, "gpt-4o");
    }
}
