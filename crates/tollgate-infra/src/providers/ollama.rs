//! Ollama provider adapter for local inference.
//!
//! Talks to the Ollama HTTP API: `/api/generate` for completions and
//! `/api/tags` for installed models. No credential is involved and all
//! generations are free.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use tollgate_core::adapter::ProviderAdapter;
use tollgate_types::llm::{GenerationOutput, ProbeReport, ProviderError, ResolvedRequest, Usage};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter {
    client: reqwest::Client,
    name: String,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(name: String, base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            client,
            name,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    model: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() {
        ProviderError::Unknown("ollama is not reachable".to_string())
    } else {
        ProviderError::Unknown(format!("HTTP request failed: {err}"))
    }
}

impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &ResolvedRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let body = OllamaGenerateRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            system: request.system.clone(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            // Ollama reports a missing model as 404 with a "not found" body.
            if status.as_u16() == 404 || error_body.contains("not found") {
                return Err(ProviderError::InvalidModel(request.model.clone()));
            }
            return Err(ProviderError::Unknown(format!(
                "HTTP {status}: {error_body}"
            )));
        }

        let wire: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("failed to parse response: {e}")))?;

        let usage = match (wire.prompt_eval_count, wire.eval_count) {
            (Some(input), Some(output)) => Some(Usage {
                input_tokens: input,
                output_tokens: output,
            }),
            _ => None,
        };

        Ok(GenerationOutput {
            content: wire.response,
            model: wire.model,
            usage,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(ProviderError::Unknown(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let wire: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("failed to parse response: {e}")))?;
        Ok(wire.models.into_iter().map(|m| m.name).collect())
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
