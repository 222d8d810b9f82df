//! OpenAI-compatible provider adapter.
//!
//! One adapter serves OpenAI itself and any endpoint speaking the same
//! chat-completions dialect (Mistral, Google's compatibility endpoint,
//! vLLM, LiteLLM proxies) via a configurable base URL.
//!
//! Uses [`async_openai`] for type-safe request/response handling.

use std::time::Instant;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use secrecy::{ExposeSecret, SecretString};

use tollgate_core::adapter::ProviderAdapter;
use tollgate_types::llm::{GenerationOutput, ProbeReport, ProviderError, ResolvedRequest, Usage};

/// Adapter for any OpenAI-compatible API.
///
/// Does NOT derive Debug: the API key lives inside the async-openai
/// client and must never reach formatted output.
pub struct OpenAiCompatAdapter {
    client: Client<OpenAIConfig>,
    name: String,
}

impl OpenAiCompatAdapter {
    pub fn new(name: String, api_key: SecretString, base_url: Option<String>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key.expose_secret());
        if let Some(base_url) = base_url {
            config = config.with_api_base(base_url);
        }
        Self {
            client: Client::with_config(config),
            name,
        }
    }

    fn build_request(&self, request: &ResolvedRequest) -> CreateChatCompletionRequest {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system.clone()),
                    name: None,
                },
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(request.prompt.clone()),
                name: None,
            },
        ));

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_completion_tokens: Some(request.max_tokens),
            temperature: request.temperature.map(|t| t as f32),
            top_p: request.top_p.map(|p| p as f32),
            ..Default::default()
        }
    }
}

fn map_openai_error(err: async_openai::error::OpenAIError) -> ProviderError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                ProviderError::AuthFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                ProviderError::RateLimited {
                    retry_after_ms: None,
                }
            } else if code == "model_not_found"
                || api_err.message.contains("does not exist")
                || api_err.message.contains("model_not_found")
            {
                ProviderError::InvalidModel(api_err.message.clone())
            } else {
                ProviderError::Unknown(err.to_string())
            }
        }
        OpenAIError::Reqwest(reqwest_err) => {
            if reqwest_err.is_timeout() {
                return ProviderError::Timeout;
            }
            match reqwest_err.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => ProviderError::AuthFailed,
                Some(429) => ProviderError::RateLimited {
                    retry_after_ms: None,
                },
                Some(404) => ProviderError::InvalidModel(err.to_string()),
                _ => ProviderError::Unknown(err.to_string()),
            }
        }
        _ => ProviderError::Unknown(err.to_string()),
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &ResolvedRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let wire_request = self.build_request(request);

        let response = self
            .client
            .chat()
            .create(wire_request)
            .await
            .map_err(map_openai_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let usage = response.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(GenerationOutput {
            content,
            model: response.model,
            usage,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .models()
            .list()
            .await
            .map_err(map_openai_error)?;
        Ok(response.data.into_iter().map(|m| m.id).collect())
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
