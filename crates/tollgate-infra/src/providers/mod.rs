//! Provider adapter construction.
//!
//! `adapter_factory()` returns the closure the dispatcher uses to build
//! (and rebuild) adapters from [`ProviderSettings`]. API keys come either
//! from an admin-supplied credential or from the environment variable
//! named in the settings, and are wrapped in [`secrecy::SecretString`]
//! immediately.

pub mod anthropic;
pub mod ollama;
pub mod openai_compat;

use std::sync::Arc;

use secrecy::SecretString;

use tollgate_core::adapter::{AdapterFactory, BoxAdapter};
use tollgate_types::error::GatewayError;
use tollgate_types::provider::{ProviderKind, ProviderSettings};

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai_compat::OpenAiCompatAdapter;

/// The production adapter factory.
pub fn adapter_factory() -> AdapterFactory {
    Arc::new(|settings, api_key| build_adapter(settings, api_key))
}

/// Build a boxed adapter for one provider's settings.
pub fn build_adapter(
    settings: &ProviderSettings,
    api_key: Option<&str>,
) -> Result<BoxAdapter, GatewayError> {
    match settings.kind {
        ProviderKind::Anthropic => {
            let key = resolve_api_key(settings, api_key)?;
            Ok(BoxAdapter::new(AnthropicAdapter::new(
                settings.name.clone(),
                key,
                settings.base_url.clone(),
            )))
        }
        ProviderKind::OpenAiCompatible => {
            let key = resolve_api_key(settings, api_key)?;
            Ok(BoxAdapter::new(OpenAiCompatAdapter::new(
                settings.name.clone(),
                key,
                settings.base_url.clone(),
            )))
        }
        ProviderKind::Ollama => Ok(BoxAdapter::new(OllamaAdapter::new(
            settings.name.clone(),
            settings.base_url.clone(),
        ))),
    }
}

/// Resolve the credential for a key-requiring provider: an explicit key
/// wins, then the environment variable named in the settings.
fn resolve_api_key(
    settings: &ProviderSettings,
    explicit: Option<&str>,
) -> Result<SecretString, GatewayError> {
    if let Some(key) = explicit {
        return Ok(SecretString::from(key.to_string()));
    }

    let var = settings.api_key_env.as_deref().ok_or_else(|| {
        GatewayError::Auth(format!(
            "provider '{}' requires an api key but no api_key_env is configured",
            settings.name
        ))
    })?;

    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(GatewayError::Auth(format!(
            "api key for provider '{}' not found in ${var}",
            settings.name
        ))),
    }
}
