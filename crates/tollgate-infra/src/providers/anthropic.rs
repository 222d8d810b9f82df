//! AnthropicAdapter -- concrete [`ProviderAdapter`] for the Anthropic
//! Messages API (`/v1/messages`).
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use tollgate_core::adapter::ProviderAdapter;
use tollgate_types::llm::{GenerationOutput, ProbeReport, ProviderError, ResolvedRequest, Usage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Claude provider adapter.
///
/// Does NOT derive Debug so the API key can never leak through formatting.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    name: String,
    api_key: SecretString,
    base_url: String,
}

impl AnthropicAdapter {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(name: String, api_key: SecretString, base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            client,
            name,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn to_wire_request(&self, request: &ResolvedRequest) -> MessagesRequest {
        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            system: request.system.clone(),
            stream: false,
            temperature: request.temperature,
            top_p: request.top_p,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unknown(format!("HTTP request failed: {err}"))
    }
}

/// Map a non-success HTTP status plus body into the error taxonomy.
fn map_status(status: reqwest::StatusCode, body: &str, model: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailed,
        404 => ProviderError::InvalidModel(model.to_string()),
        429 => ProviderError::RateLimited {
            retry_after_ms: None,
        },
        408 | 504 => ProviderError::Timeout,
        _ => ProviderError::Unknown(format!("HTTP {status}: {body}")),
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &ResolvedRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let body = self.to_wire_request(request);

        let response = self
            .client
            .post(self.url("/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let error_body = response.text().await.unwrap_or_default();
            let err = map_status(status, &error_body, &request.model);
            return Err(match err {
                ProviderError::RateLimited { .. } => ProviderError::RateLimited { retry_after_ms },
                other => other,
            });
        }

        let wire: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("failed to parse response: {e}")))?;

        let content = wire
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(GenerationOutput {
            content,
            model: wire.model,
            usage: wire.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(self.url("/v1/models"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &error_body, ""));
        }

        let wire: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("failed to parse response: {e}")))?;
        Ok(wire.data.into_iter().map(|m| m.id).collect())
    }

    async fn health_check(&self) -> Result<ProbeReport, ProviderError> {
        let started = Instant::now();
        let healthy = self.list_models().await.is_ok();
        Ok(ProbeReport {
            healthy,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
