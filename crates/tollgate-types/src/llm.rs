//! Unified request/response types for LLM generation.
//!
//! These types model the data shapes flowing through the gateway:
//! caller-facing generation requests, the resolved request handed to a
//! provider adapter, adapter outputs with token usage, and the provider
//! error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// Unified generation request as submitted by a caller.
///
/// Provider and model are optional; the dispatcher resolves them against
/// configured defaults before anything else happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Accepted for interface parity; execution is always non-streaming.
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl GenerationRequest {
    /// Build a minimal request with just a prompt.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            provider: None,
            model: None,
            user_id: None,
            session_id: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stream: false,
            context: None,
        }
    }
}

/// A request after provider/model resolution, ready for an adapter.
///
/// `request_id` is the logical id of the dispatch: retries reuse it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedRequest {
    pub request_id: Uuid,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// Token usage for a completed generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Raw output from a provider adapter.
///
/// `usage` is `None` when the backend did not report token counts; the
/// dispatcher falls back to the local estimator in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Result of an adapter health probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbeReport {
    pub healthy: bool,
    pub latency_ms: u64,
}

/// The caller-facing result of a successful dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub request_id: Uuid,
    pub response_id: Uuid,
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u32,
    pub cost: f64,
    pub cached: bool,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Errors from provider adapter operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("request timed out")]
    Timeout,

    #[error("authentication failed")]
    AuthFailed,

    #[error("invalid model: '{0}'")]
    InvalidModel(String),

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Whether a retry against the same provider could succeed.
    ///
    /// Rate limits and timeouts are transient; auth and model errors will
    /// fail identically on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [MessageRole::System, MessageRole::User, MessageRole::Assistant] {
            let s = role.to_string();
            let parsed: MessageRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_message_role_serde() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_generation_request_defaults() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"prompt":"hello"}"#).unwrap();
        assert_eq!(req.prompt, "hello");
        assert!(req.provider.is_none());
        assert!(!req.stream);
    }

    #[test]
    fn test_usage_total_saturates() {
        let usage = Usage {
            input_tokens: u32::MAX,
            output_tokens: 10,
        };
        assert_eq!(usage.total(), u32::MAX);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::RateLimited { retry_after_ms: None }.is_transient());
        assert!(!ProviderError::AuthFailed.is_transient());
        assert!(!ProviderError::InvalidModel("gpt-9".into()).is_transient());
        assert!(!ProviderError::Unknown("boom".into()).is_transient());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::InvalidModel("nope".to_string());
        assert_eq!(err.to_string(), "invalid model: 'nope'");
    }
}
