//! BoxAdapter -- object-safe dynamic dispatch wrapper for ProviderAdapter.
//!
//! Three-step pattern:
//! 1. Define an object-safe `AdapterDyn` trait with boxed futures
//! 2. Blanket-impl `AdapterDyn` for all `T: ProviderAdapter`
//! 3. `BoxAdapter` wraps `Box<dyn AdapterDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use tollgate_types::llm::{GenerationOutput, ProbeReport, ProviderError, ResolvedRequest};

use super::contract::ProviderAdapter;

/// Object-safe version of [`ProviderAdapter`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation
/// covers every `ProviderAdapter`.
pub trait AdapterDyn: Send + Sync {
    fn name(&self) -> &str;

    fn generate_boxed<'a>(
        &'a self,
        request: &'a ResolvedRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GenerationOutput, ProviderError>> + Send + 'a>>;

    fn list_models_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ProviderError>> + Send + '_>>;

    fn health_check_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeReport, ProviderError>> + Send + '_>>;
}

impl<T: ProviderAdapter> AdapterDyn for T {
    fn name(&self) -> &str {
        ProviderAdapter::name(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        request: &'a ResolvedRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GenerationOutput, ProviderError>> + Send + 'a>> {
        Box::pin(self.generate(request))
    }

    fn list_models_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ProviderError>> + Send + '_>> {
        Box::pin(self.list_models())
    }

    fn health_check_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeReport, ProviderError>> + Send + '_>> {
        Box::pin(self.health_check())
    }
}

/// Type-erased provider adapter for runtime backend selection.
///
/// `ProviderAdapter` uses RPITIT, so it cannot be a trait object directly;
/// `BoxAdapter` provides equivalent methods delegating to the inner
/// `AdapterDyn` object.
pub struct BoxAdapter {
    inner: Box<dyn AdapterDyn>,
}

impl BoxAdapter {
    /// Wrap a concrete adapter in a type-erased box.
    pub fn new<T: ProviderAdapter + 'static>(adapter: T) -> Self {
        Self {
            inner: Box::new(adapter),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Execute a single generation call.
    pub async fn generate(
        &self,
        request: &ResolvedRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        self.inner.generate_boxed(request).await
    }

    /// List the model identifiers this backend currently offers.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_models_boxed().await
    }

    /// Cheapest possible round trip, reporting liveness and latency.
    pub async fn health_check(&self) -> Result<ProbeReport, ProviderError> {
        self.inner.health_check_boxed().await
    }
}
