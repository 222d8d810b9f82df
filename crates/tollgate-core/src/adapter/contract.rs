//! ProviderAdapter trait definition.
//!
//! This is the capability contract every backend implements:
//! {generate, list_models, health_check}. Uses native async fn in traits
//! (RPITIT); the object-safe boxing lives in [`super::box_adapter`].

use std::sync::Arc;

use tollgate_types::error::GatewayError;
use tollgate_types::llm::{GenerationOutput, ProbeReport, ProviderError, ResolvedRequest};
use tollgate_types::provider::ProviderSettings;

use super::box_adapter::BoxAdapter;

/// Contract for LLM provider backends (Anthropic, OpenAI-compatible,
/// local inference, etc.).
///
/// Implementations live in tollgate-infra. The dispatcher only ever sees
/// the boxed form, so adding a backend means adding one implementation
/// and one factory arm.
pub trait ProviderAdapter: Send + Sync {
    /// Registry key this adapter serves (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Execute a single generation call.
    fn generate(
        &self,
        request: &ResolvedRequest,
    ) -> impl std::future::Future<Output = Result<GenerationOutput, ProviderError>> + Send;

    /// List the model identifiers this backend currently offers.
    ///
    /// The listing is finite and restartable: calling it again re-fetches
    /// from the backend rather than resuming an iterator.
    fn list_models(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, ProviderError>> + Send;

    /// Cheapest possible round trip, reporting liveness and latency.
    fn health_check(
        &self,
    ) -> impl std::future::Future<Output = Result<ProbeReport, ProviderError>> + Send;
}

/// Builds a boxed adapter from provider settings and an optional API key.
///
/// Supplied by tollgate-infra at startup; the dispatcher calls it again
/// when an admin enables a provider with a fresh credential.
pub type AdapterFactory = Arc<
    dyn Fn(&ProviderSettings, Option<&str>) -> Result<BoxAdapter, GatewayError> + Send + Sync,
>;
