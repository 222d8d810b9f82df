//! Request dispatcher: the pipeline behind every generation call.
//!
//! A dispatch flows through resolution (provider, model, parameters),
//! the single-flight response cache, budget reservation, the provider's
//! circuit breaker, its concurrency limit, and finally the adapter call
//! with timeout and transient-error retry. Success commits the actual
//! cost against the reservation; any failure rolls the reservation back
//! and feeds the breaker exactly once.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tollgate_types::config::{GatewayConfig, RetryConfig};
use tollgate_types::error::GatewayError;
use tollgate_types::llm::{
    GenerationOutput, GenerationRequest, GenerationResult, ProviderError, ResolvedRequest, Usage,
};
use tollgate_types::provider::{ProviderSettings, ProviderStatus};
use tollgate_types::usage::{PeriodType, UsageEvent, UsageStat};

use crate::adapter::{AdapterFactory, BoxAdapter};
use crate::analytics::UsageAggregator;
use crate::breaker::{Admission, CircuitBreaker};
use crate::budget::BudgetGuard;
use crate::cache::{CacheDecision, ResponseCache, fingerprint};
use crate::conversation::{ConversationRepository, ConversationService, render_transcript};
use crate::estimate::{PricingSource, compute_cost, estimate_cost, estimate_tokens};
use crate::health::HealthState;

/// Output token ceiling applied when the caller does not set one.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Ceiling for a single health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime state for one configured provider.
///
/// The adapter slot is `None` when the provider could not be constructed
/// (typically a missing API key); the provider then rejects traffic until
/// an admin enables it with a credential.
pub struct ProviderContext {
    settings: RwLock<ProviderSettings>,
    enabled: AtomicBool,
    adapter: RwLock<Option<Arc<BoxAdapter>>>,
    budget: BudgetGuard,
    breaker: CircuitBreaker,
    health: HealthState,
    semaphore: Arc<Semaphore>,
}

impl ProviderContext {
    fn build(settings: ProviderSettings, config: &GatewayConfig, factory: &AdapterFactory) -> Self {
        let adapter = match factory(&settings, None) {
            Ok(adapter) => Some(Arc::new(adapter)),
            Err(err) => {
                warn!(
                    provider = %settings.name,
                    error = %err,
                    "Provider adapter unavailable at startup"
                );
                None
            }
        };
        Self {
            enabled: AtomicBool::new(settings.enabled),
            budget: BudgetGuard::new(&settings.name, settings.daily_cost_limit),
            breaker: CircuitBreaker::new(&config.breaker),
            health: HealthState::new(),
            semaphore: Arc::new(Semaphore::new(settings.max_in_flight)),
            adapter: RwLock::new(adapter),
            settings: RwLock::new(settings),
        }
    }

    fn settings(&self) -> ProviderSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn adapter(&self) -> Option<Arc<BoxAdapter>> {
        self.adapter
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Per-provider view returned by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthReport {
    pub provider: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
    pub circuit_state: String,
}

/// Aggregate health across all providers.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayHealth {
    /// "ok" when at least one enabled provider is healthy.
    pub status: String,
    pub providers: Vec<ProviderHealthReport>,
}

/// Cost projection for a prompt before dispatching it.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateReport {
    pub provider: String,
    pub model: String,
    pub estimated_input_tokens: u32,
    pub max_output_tokens: u32,
    pub estimated_cost: f64,
    pub remaining_budget: f64,
    pub within_budget: bool,
}

/// Per-provider outcome of a comparison run.
#[derive(Debug, Clone, Serialize)]
pub struct CompareEntry {
    pub provider: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The orchestration gateway: providers, cache, budgets, breakers,
/// conversations, and analytics behind one dispatch surface.
///
/// Generic over the conversation repository so the core crate stays free
/// of persistence concerns.
pub struct Gateway<R: ConversationRepository> {
    providers: DashMap<String, Arc<ProviderContext>>,
    default_provider: Option<String>,
    cache: ResponseCache,
    conversations: ConversationService<R>,
    analytics: UsageAggregator,
    pricing: Arc<dyn PricingSource>,
    factory: AdapterFactory,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl<R: ConversationRepository> Gateway<R> {
    pub fn new(
        config: GatewayConfig,
        factory: AdapterFactory,
        pricing: Arc<dyn PricingSource>,
        repo: Arc<R>,
    ) -> Self {
        let providers = DashMap::new();
        for settings in &config.providers {
            providers.insert(
                settings.name.clone(),
                Arc::new(ProviderContext::build(settings.clone(), &config, &factory)),
            );
        }
        Self {
            providers,
            default_provider: config.default_provider.clone(),
            cache: ResponseCache::new(&config.cache),
            conversations: ConversationService::new(repo, config.conversation.clone()),
            analytics: UsageAggregator::new(),
            pricing,
            factory,
            retry: config.retry.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Unified entry point: requests carrying a session id run as chat
    /// exchanges, everything else dispatches statelessly.
    pub async fn dispatch(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GatewayError> {
        if request.session_id.is_some() {
            self.chat(request).await
        } else {
            self.generate(request).await
        }
    }

    /// Stateless generation: resolve, then run the dispatch pipeline.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GatewayError> {
        let (ctx, resolved) = self.resolve(&request)?;
        self.dispatch_resolved(&ctx, resolved).await
    }

    /// Conversational generation: the exchange runs under the session's
    /// lock, carries the recent history window as context, and is
    /// recorded in the conversation log whatever the outcome.
    pub async fn chat(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GatewayError> {
        let session_id = request
            .session_id
            .clone()
            .ok_or_else(|| GatewayError::Validation("chat requests require a session_id".into()))?;

        let session = self.conversations.lock_session(&session_id).await;
        let outcome = self.chat_locked(&session_id, request).await;
        drop(session);
        // Uncontended entries are dropped so the lock map tracks live
        // sessions, not every session ever seen.
        self.conversations.release_session(&session_id);
        outcome
    }

    async fn chat_locked(
        &self,
        session_id: &str,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GatewayError> {
        let mut conversation = self
            .conversations
            .ensure_conversation(session_id, request.user_id.as_deref())
            .await?;

        // Sticky routing: an ongoing conversation keeps its provider and
        // model unless the request overrides them.
        let mut effective = request.clone();
        if effective.provider.is_none() {
            effective.provider = conversation.default_provider.clone();
        }
        if effective.model.is_none() {
            effective.model = conversation.default_model.clone();
        }

        let (ctx, mut resolved) = self.resolve(&effective)?;
        let context = self.conversations.context_messages(&conversation).await?;
        let user_prompt = request.prompt.trim().to_string();
        resolved.system = self.conversations.system_prompt().map(str::to_string);
        resolved.prompt = render_transcript(&context, &user_prompt);

        match self.dispatch_resolved(&ctx, resolved).await {
            Ok(mut result) => {
                let (user_message_id, assistant_message_id) = self
                    .conversations
                    .record_exchange(&mut conversation, &user_prompt, &result)
                    .await?;
                // Surface the conversation linkage alongside the result.
                let meta = result.metadata.get_or_insert_with(|| json!({}));
                if let Some(obj) = meta.as_object_mut() {
                    obj.insert("conversation_id".into(), json!(conversation.id));
                    obj.insert("user_message_id".into(), json!(user_message_id));
                    obj.insert(
                        "assistant_message_id".into(),
                        json!(assistant_message_id),
                    );
                    obj.insert("message_count".into(), json!(conversation.message_count));
                }
                Ok(result)
            }
            Err(err) => {
                if let Err(record_err) = self
                    .conversations
                    .record_failure(&mut conversation, &user_prompt, &err.to_string())
                    .await
                {
                    warn!(
                        session_id = %session_id,
                        error = %record_err,
                        "Failed to record failed exchange"
                    );
                }
                Err(err)
            }
        }
    }

    /// Message history for a session's active conversation.
    pub async fn history(
        &self,
        session_id: &str,
        limit: Option<i64>,
    ) -> Result<
        (
            tollgate_types::conversation::Conversation,
            Vec<tollgate_types::conversation::StoredMessage>,
        ),
        GatewayError,
    > {
        self.conversations.history(session_id, limit).await
    }

    /// Live status of every configured provider, sorted by name.
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        let mut statuses: Vec<ProviderStatus> = self
            .providers
            .iter()
            .map(|entry| self.status_of(entry.value()))
            .collect();
        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }

    /// Enable or disable a provider. Enabling with a fresh API key
    /// rebuilds the adapter through the factory; an optional model
    /// becomes the provider's new default.
    pub fn set_provider_enabled(
        &self,
        name: &str,
        enabled: bool,
        api_key: Option<&str>,
        model: Option<&str>,
    ) -> Result<ProviderStatus, GatewayError> {
        let ctx = self.context(name)?;
        if enabled {
            if let Some(model) = model {
                let mut settings = ctx.settings.write().unwrap_or_else(|e| e.into_inner());
                settings.default_model = model.to_string();
            }
            let settings = ctx.settings();
            if api_key.is_some() || ctx.adapter().is_none() {
                let adapter = (self.factory)(&settings, api_key)?;
                let mut slot = ctx.adapter.write().unwrap_or_else(|e| e.into_inner());
                *slot = Some(Arc::new(adapter));
            }
            ctx.enabled.store(true, Ordering::Relaxed);
            info!(provider = %name, "Provider enabled");
        } else {
            ctx.enabled.store(false, Ordering::Relaxed);
            info!(provider = %name, "Provider disabled");
        }
        Ok(self.status_of(&ctx))
    }

    /// Models reported by a provider's backend.
    pub async fn list_models(&self, name: &str) -> Result<Vec<String>, GatewayError> {
        let ctx = self.context(name)?;
        let adapter = ctx
            .adapter()
            .ok_or_else(|| GatewayError::Auth(format!("provider '{name}' has no adapter")))?;
        adapter
            .list_models()
            .await
            .map_err(|source| GatewayError::Provider {
                provider: name.to_string(),
                attempts: 1,
                source,
            })
    }

    /// Probe every provider and fold the results into the health view.
    pub async fn health_report(&self) -> GatewayHealth {
        let contexts: Vec<(String, Arc<ProviderContext>)> = self
            .providers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let probes = contexts.iter().map(|(name, ctx)| async move {
            let report = match ctx.adapter() {
                Some(adapter) => match timeout(PROBE_TIMEOUT, adapter.health_check()).await {
                    Ok(Ok(report)) => report,
                    Ok(Err(err)) => {
                        debug!(provider = %name, error = %err, "Health probe failed");
                        tollgate_types::llm::ProbeReport {
                            healthy: false,
                            latency_ms: PROBE_TIMEOUT.as_millis() as u64,
                        }
                    }
                    Err(_) => tollgate_types::llm::ProbeReport {
                        healthy: false,
                        latency_ms: PROBE_TIMEOUT.as_millis() as u64,
                    },
                },
                None => tollgate_types::llm::ProbeReport {
                    healthy: false,
                    latency_ms: 0,
                },
            };
            ctx.health.record_probe(&report);
            let snapshot = ctx.health.snapshot();
            ProviderHealthReport {
                provider: name.clone(),
                healthy: snapshot.healthy,
                latency_ms: snapshot.latency_ms,
                checked_at: snapshot.checked_at,
                circuit_state: ctx.breaker.state_name().to_string(),
            }
        });

        let mut providers: Vec<ProviderHealthReport> =
            futures_util::future::join_all(probes).await;
        providers.sort_by(|a, b| a.provider.cmp(&b.provider));

        let any_healthy = providers.iter().any(|p| p.healthy);
        GatewayHealth {
            status: if any_healthy { "ok" } else { "degraded" }.to_string(),
            providers,
        }
    }

    /// Aggregated usage stats for a period granularity.
    pub fn usage(
        &self,
        period: PeriodType,
        since: Option<DateTime<Utc>>,
        provider: Option<&str>,
    ) -> Vec<UsageStat> {
        self.analytics.query(period, since, provider)
    }

    /// Project the cost of a prompt without dispatching it.
    pub fn estimate(&self, request: &GenerationRequest) -> Result<EstimateReport, GatewayError> {
        let (ctx, resolved) = self.resolve(request)?;
        let pricing = self.pricing.pricing(&resolved.provider, &resolved.model);
        let estimated_cost = estimate_cost(&resolved.prompt, resolved.max_tokens, pricing);
        let remaining = ctx.budget.remaining();
        Ok(EstimateReport {
            provider: resolved.provider,
            model: resolved.model,
            estimated_input_tokens: estimate_tokens(&resolved.prompt),
            max_output_tokens: resolved.max_tokens,
            estimated_cost,
            remaining_budget: remaining,
            within_budget: estimated_cost <= remaining,
        })
    }

    /// Run one prompt against several providers concurrently and report
    /// each outcome separately.
    pub async fn compare(
        &self,
        request: &GenerationRequest,
        providers: &[String],
    ) -> Result<Vec<CompareEntry>, GatewayError> {
        if providers.is_empty() {
            return Err(GatewayError::Validation(
                "compare requires at least one provider".into(),
            ));
        }

        let runs = providers.iter().map(|name| {
            let mut sub = request.clone();
            sub.provider = Some(name.clone());
            sub.session_id = None;
            async move {
                match self.generate(sub).await {
                    Ok(result) => CompareEntry {
                        provider: name.clone(),
                        success: true,
                        result: Some(result),
                        error: None,
                    },
                    Err(err) => CompareEntry {
                        provider: name.clone(),
                        success: false,
                        result: None,
                        error: Some(err.to_string()),
                    },
                }
            }
        });

        Ok(futures_util::future::join_all(runs).await)
    }

    // --- pipeline internals ---

    fn context(&self, name: &str) -> Result<Arc<ProviderContext>, GatewayError> {
        self.providers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GatewayError::NotFound(format!("unknown provider '{name}'")))
    }

    /// Validate a request and pin down provider, model and parameters.
    fn resolve(
        &self,
        request: &GenerationRequest,
    ) -> Result<(Arc<ProviderContext>, ResolvedRequest), GatewayError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(GatewayError::Validation("prompt must not be empty".into()));
        }
        if let Some(t) = request.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(GatewayError::Validation(format!(
                "temperature must be within [0.0, 2.0], got {t}"
            )));
        }
        if let Some(p) = request.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(GatewayError::Validation(format!(
                "top_p must be within [0.0, 1.0], got {p}"
            )));
        }
        if request.max_tokens == Some(0) {
            return Err(GatewayError::Validation("max_tokens must be positive".into()));
        }

        let name = request
            .provider
            .clone()
            .or_else(|| self.default_provider.clone())
            .ok_or_else(|| {
                GatewayError::Validation(
                    "no provider specified and no default configured".into(),
                )
            })?;
        let ctx = self.context(&name)?;
        if !ctx.is_enabled() {
            return Err(GatewayError::Auth(format!("provider '{name}' is disabled")));
        }

        let settings = ctx.settings();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| settings.default_model.clone());

        let resolved = ResolvedRequest {
            request_id: Uuid::now_v7(),
            provider: name,
            model,
            prompt: prompt.to_string(),
            system: None,
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            top_p: request.top_p,
        };
        Ok((ctx, resolved))
    }

    /// Run a resolved request through the cache and, when leading, the
    /// live pipeline.
    async fn dispatch_resolved(
        &self,
        ctx: &Arc<ProviderContext>,
        resolved: ResolvedRequest,
    ) -> Result<GenerationResult, GatewayError> {
        let key = fingerprint(
            &resolved.provider,
            &resolved.model,
            &resolved.prompt,
            resolved.temperature,
            resolved.max_tokens,
            resolved.top_p,
        );

        match self.cache.begin(&key) {
            CacheDecision::Hit(result) => {
                debug!(
                    provider = %resolved.provider,
                    request_id = %resolved.request_id,
                    "Cache hit"
                );
                self.record_event(&resolved, true, true, 0.0, 0);
                Ok(result)
            }
            CacheDecision::Follower(mut rx) => {
                let started = Instant::now();
                match rx.recv().await {
                    Ok(Ok(result)) => {
                        self.record_event(
                            &resolved,
                            true,
                            true,
                            0.0,
                            started.elapsed().as_millis() as u64,
                        );
                        Ok(result)
                    }
                    Ok(Err(shared)) => {
                        self.record_event(
                            &resolved,
                            false,
                            false,
                            0.0,
                            started.elapsed().as_millis() as u64,
                        );
                        Err(clone_error(&shared))
                    }
                    Err(_) => {
                        self.record_event(
                            &resolved,
                            false,
                            false,
                            0.0,
                            started.elapsed().as_millis() as u64,
                        );
                        Err(GatewayError::Cache(
                            "in-flight request ended without an outcome".into(),
                        ))
                    }
                }
            }
            CacheDecision::Leader(guard) => match self.execute_live(ctx, &resolved).await {
                Ok(result) => {
                    guard.complete(&result);
                    Ok(result)
                }
                Err(err) => {
                    let shared = Arc::new(err);
                    guard.fail(Arc::clone(&shared));
                    Err(clone_error(&shared))
                }
            },
            CacheDecision::Bypass => self.execute_live(ctx, &resolved).await,
        }
    }

    /// The live call: budget, breaker, concurrency limit, then the
    /// adapter with timeout and retry.
    async fn execute_live(
        &self,
        ctx: &Arc<ProviderContext>,
        resolved: &ResolvedRequest,
    ) -> Result<GenerationResult, GatewayError> {
        let started = Instant::now();

        let adapter = ctx.adapter().ok_or_else(|| {
            GatewayError::Auth(format!(
                "provider '{}' is not configured with a credential",
                resolved.provider
            ))
        })?;

        let pricing = self.pricing.pricing(&resolved.provider, &resolved.model);
        let estimate = estimate_cost(&resolved.prompt, resolved.max_tokens, pricing);
        let reservation = ctx.budget.reserve(estimate)?;

        // The breaker admission comes after the reservation so a rejected
        // admission only has to drop the reservation to undo everything.
        // The guard settles the admission; if this future is cancelled
        // before a verdict, its drop frees a half-open probe slot.
        let admission = match ctx.breaker.try_acquire() {
            Admission::Allowed(guard) => guard,
            Admission::Rejected { retry_in_ms } => {
                return Err(GatewayError::CircuitOpen {
                    provider: resolved.provider.clone(),
                    retry_in_ms,
                });
            }
        };

        let outcome = async {
            let _permit = ctx
                .semaphore
                .acquire()
                .await
                .map_err(|_| (ProviderError::Unknown("provider shutting down".into()), 1u32))?;

            let mut attempt = 1u32;
            loop {
                let call = adapter.generate(resolved);
                let result = match timeout(self.request_timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                };
                match result {
                    Ok(output) => break Ok((output, attempt)),
                    Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                        let delay = Duration::from_millis(
                            self.retry.base_delay_ms.saturating_mul(1 << (attempt - 1)),
                        );
                        warn!(
                            provider = %resolved.provider,
                            request_id = %resolved.request_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient provider error, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => break Err((err, attempt)),
                }
            }
        }
        .await;

        match outcome {
            Ok((output, attempts)) => {
                admission.success();
                ctx.health.record_outcome(true);

                let usage = output.usage.unwrap_or_else(|| Usage {
                    input_tokens: estimate_tokens(&resolved.prompt),
                    output_tokens: estimate_tokens(&output.content),
                });
                let actual = compute_cost(usage, pricing);
                reservation.commit(actual);

                let elapsed = started.elapsed().as_millis() as u64;
                let result = self.build_result(resolved, output, usage, actual, attempts, elapsed);
                self.record_event(resolved, true, false, actual, elapsed);
                info!(
                    provider = %resolved.provider,
                    model = %result.model,
                    request_id = %resolved.request_id,
                    tokens = result.tokens_used,
                    cost = result.cost,
                    elapsed_ms = elapsed,
                    attempts,
                    "Generation completed"
                );
                Ok(result)
            }
            Err((err, attempts)) => {
                admission.failure(&err);
                ctx.health.record_outcome(false);
                drop(reservation);

                let elapsed = started.elapsed().as_millis() as u64;
                self.record_event(resolved, false, false, 0.0, elapsed);
                warn!(
                    provider = %resolved.provider,
                    request_id = %resolved.request_id,
                    attempts,
                    error = %err,
                    "Generation failed"
                );
                Err(GatewayError::Provider {
                    provider: resolved.provider.clone(),
                    attempts,
                    source: err,
                })
            }
        }
    }

    fn build_result(
        &self,
        resolved: &ResolvedRequest,
        output: GenerationOutput,
        usage: Usage,
        cost: f64,
        attempts: u32,
        elapsed_ms: u64,
    ) -> GenerationResult {
        GenerationResult {
            request_id: resolved.request_id,
            response_id: Uuid::now_v7(),
            content: output.content,
            provider: resolved.provider.clone(),
            model: output.model,
            tokens_used: usage.total(),
            cost,
            cached: false,
            processing_time_ms: elapsed_ms,
            metadata: Some(json!({
                "attempts": attempts,
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens,
            })),
        }
    }

    fn record_event(
        &self,
        resolved: &ResolvedRequest,
        success: bool,
        cached: bool,
        cost: f64,
        latency_ms: u64,
    ) {
        self.analytics.record(&UsageEvent {
            timestamp: Utc::now(),
            provider: resolved.provider.clone(),
            model: resolved.model.clone(),
            success,
            cached,
            cost,
            latency_ms,
        });
    }

    fn status_of(&self, ctx: &ProviderContext) -> ProviderStatus {
        let settings = ctx.settings();
        let breaker = ctx.breaker.snapshot();
        ProviderStatus {
            provider: settings.name,
            is_enabled: ctx.is_enabled(),
            is_healthy: ctx.health.is_healthy(),
            api_key_configured: ctx.adapter().is_some(),
            default_model: settings.default_model,
            current_daily_cost: ctx.budget.current_spend(),
            daily_cost_limit: ctx.budget.daily_limit(),
            circuit_state: breaker.state.to_string(),
            total_calls: breaker.total_calls,
            total_failures: breaker.total_failures,
            last_error: breaker.last_error,
        }
    }
}

/// Rebuild a `GatewayError` from the shared copy handed to cache
/// followers. Repository errors collapse to their message; every other
/// variant reconstructs losslessly.
fn clone_error(err: &GatewayError) -> GatewayError {
    match err {
        GatewayError::Validation(s) => GatewayError::Validation(s.clone()),
        GatewayError::Auth(s) => GatewayError::Auth(s.clone()),
        GatewayError::BudgetExceeded {
            provider,
            estimated,
            remaining,
        } => GatewayError::BudgetExceeded {
            provider: provider.clone(),
            estimated: *estimated,
            remaining: *remaining,
        },
        GatewayError::CircuitOpen {
            provider,
            retry_in_ms,
        } => GatewayError::CircuitOpen {
            provider: provider.clone(),
            retry_in_ms: *retry_in_ms,
        },
        GatewayError::Provider {
            provider,
            attempts,
            source,
        } => GatewayError::Provider {
            provider: provider.clone(),
            attempts: *attempts,
            source: source.clone(),
        },
        GatewayError::Cache(s) => GatewayError::Cache(s.clone()),
        GatewayError::NotFound(s) => GatewayError::NotFound(s.clone()),
        GatewayError::Repository(e) => GatewayError::Internal(format!("repository error: {e}")),
        GatewayError::Internal(s) => GatewayError::Internal(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use tollgate_types::config::{BreakerConfig, CacheConfig, ConversationConfig};
    use tollgate_types::llm::ProbeReport;
    use tollgate_types::provider::{ModelPricing, ProviderKind};

    use crate::adapter::ProviderAdapter;
    use crate::conversation::InMemoryConversationRepository;
    use crate::estimate::FlatPricing;

    /// Adapter scripted with a queue of outcomes; repeats the last one
    /// when the queue runs dry.
    struct ScriptedAdapter {
        name: String,
        script: Mutex<VecDeque<Result<GenerationOutput, ProviderError>>>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedAdapter {
        fn ok_output(content: &str) -> GenerationOutput {
            GenerationOutput {
                content: content.to_string(),
                model: "test-model".to_string(),
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 20,
                }),
            }
        }
    }

    impl ProviderAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            _request: &ResolvedRequest,
        ) -> Result<GenerationOutput, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            match script.len() {
                0 => Ok(Self::ok_output("fallback")),
                1 => script.front().cloned().unwrap(),
                _ => script.pop_front().unwrap(),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["test-model".to_string()])
        }

        async fn health_check(&self) -> Result<ProbeReport, ProviderError> {
            Ok(ProbeReport {
                healthy: true,
                latency_ms: 5,
            })
        }
    }

    struct Harness {
        gateway: Gateway<InMemoryConversationRepository>,
        calls: Arc<AtomicU32>,
    }

    fn settings(name: &str, limit: f64) -> ProviderSettings {
        ProviderSettings {
            name: name.to_string(),
            kind: ProviderKind::OpenAiCompatible,
            api_key_env: None,
            base_url: None,
            default_model: "test-model".to_string(),
            daily_cost_limit: limit,
            max_in_flight: 8,
            enabled: true,
        }
    }

    fn base_config() -> GatewayConfig {
        GatewayConfig {
            default_provider: Some("primary".to_string()),
            cache: CacheConfig {
                enabled: true,
                ttl_secs: 3600,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
            },
            breaker: BreakerConfig {
                failure_threshold: 3,
                cooldown_secs: 30,
                max_cooldown_secs: 300,
            },
            conversation: ConversationConfig::default(),
            request_timeout_secs: 5,
            providers: vec![settings("primary", 10.0), settings("secondary", 10.0)],
            pricing: Vec::new(),
        }
    }

    fn flat_pricing() -> Arc<FlatPricing> {
        // $1 per million tokens on both sides keeps the arithmetic easy:
        // a token costs exactly $0.000001.
        Arc::new(FlatPricing(ModelPricing {
            input_cost_per_million: 1.0,
            output_cost_per_million: 1.0,
        }))
    }

    fn harness_with(
        script: Vec<Result<GenerationOutput, ProviderError>>,
        mutate: impl FnOnce(&mut GatewayConfig),
    ) -> Harness {
        let mut config = base_config();
        mutate(&mut config);

        let calls = Arc::new(AtomicU32::new(0));
        let script = Arc::new(Mutex::new(Some(script)));
        let factory: AdapterFactory = {
            let calls = Arc::clone(&calls);
            Arc::new(move |settings, _key| {
                // The scripted queue feeds the first-built adapter; any
                // further providers echo successes.
                let script = script.lock().unwrap().take().unwrap_or_default();
                Ok(BoxAdapter::new(ScriptedAdapter {
                    name: settings.name.clone(),
                    script: Mutex::new(script.into()),
                    calls: Arc::clone(&calls),
                }))
            })
        };

        Harness {
            gateway: Gateway::new(
                config,
                factory,
                flat_pricing(),
                Arc::new(InMemoryConversationRepository::new()),
            ),
            calls,
        }
    }

    fn harness(script: Vec<Result<GenerationOutput, ProviderError>>) -> Harness {
        harness_with(script, |_| {})
    }

    #[tokio::test]
    async fn test_generate_commits_actual_cost() {
        let h = harness(vec![Ok(ScriptedAdapter::ok_output("hello"))]);
        let result = h
            .gateway
            .generate(GenerationRequest::from_prompt("say hello"))
            .await
            .unwrap();

        assert_eq!(result.content, "hello");
        assert_eq!(result.provider, "primary");
        assert_eq!(result.tokens_used, 30);
        assert!(!result.cached);
        // 30 tokens at $1 per million.
        assert!((result.cost - 0.00003).abs() < 1e-9);

        let status = h.gateway.provider_statuses();
        let primary = status.iter().find(|s| s.provider == "primary").unwrap();
        assert!((primary.current_daily_cost - 0.00003).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let h = harness(vec![]);
        let err = h
            .gateway
            .generate(GenerationRequest::from_prompt("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let h = harness(vec![]);
        let mut req = GenerationRequest::from_prompt("hi");
        req.provider = Some("missing".to_string());
        assert!(matches!(
            h.gateway.generate(req).await.unwrap_err(),
            GatewayError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_disabled_provider_rejects_traffic() {
        let h = harness(vec![Ok(ScriptedAdapter::ok_output("x"))]);
        h.gateway
            .set_provider_enabled("primary", false, None, None)
            .unwrap();
        let err = h
            .gateway
            .generate(GenerationRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));

        let status = h
            .gateway
            .set_provider_enabled("primary", true, None, Some("scripted-v2"))
            .unwrap();
        assert!(status.is_enabled);
        assert_eq!(status.default_model, "scripted-v2");
        assert!(
            h.gateway
                .generate(GenerationRequest::from_prompt("hi"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_identical_request_hits_cache() {
        let h = harness(vec![Ok(ScriptedAdapter::ok_output("cached reply"))]);
        let first = h
            .gateway
            .generate(GenerationRequest::from_prompt("same prompt"))
            .await
            .unwrap();
        let second = h
            .gateway
            .generate(GenerationRequest::from_prompt("same prompt"))
            .await
            .unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.processing_time_ms, 0);
        assert_eq!(second.content, "cached reply");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        // The hit committed nothing further against the budget.
        let statuses = h.gateway.provider_statuses();
        let primary = statuses.iter().find(|s| s.provider == "primary").unwrap();
        assert!((primary.current_daily_cost - first.cost).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let h = harness(vec![
            Err(ProviderError::RateLimited {
                retry_after_ms: Some(1),
            }),
            Err(ProviderError::Timeout),
            Ok(ScriptedAdapter::ok_output("third time lucky")),
        ]);
        let result = h
            .gateway
            .generate(GenerationRequest::from_prompt("retry me"))
            .await
            .unwrap();
        assert_eq!(result.content, "third time lucky");
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.metadata.unwrap()["attempts"], 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let h = harness(vec![Err(ProviderError::AuthFailed)]);
        let err = h
            .gateway
            .generate(GenerationRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        match err {
            GatewayError::Provider {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 1);
                assert!(matches!(source, ProviderError::AuthFailed));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_roll_back_budget_and_open_circuit() {
        let h = harness(vec![Err(ProviderError::Unknown("boom".into()))]);
        for _ in 0..3 {
            let mut req = GenerationRequest::from_prompt("fail");
            // Unique prompts defeat the cache so every call goes live.
            req.prompt = format!("fail {}", Uuid::now_v7());
            let err = h.gateway.generate(req).await.unwrap_err();
            assert!(matches!(err, GatewayError::Provider { .. }));
        }

        let statuses = h.gateway.provider_statuses();
        let primary = statuses.iter().find(|s| s.provider == "primary").unwrap();
        assert_eq!(primary.current_daily_cost, 0.0);
        assert_eq!(primary.circuit_state, "open");
        assert_eq!(primary.total_failures, 3);

        let err = h
            .gateway
            .generate(GenerationRequest::from_prompt("now what"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_rejects_before_the_adapter() {
        // Limit far below the estimate for any prompt plus max_tokens.
        let h = harness_with(vec![Ok(ScriptedAdapter::ok_output("x"))], |config| {
            config.providers[0].daily_cost_limit = 0.000001;
        });
        let err = h
            .gateway
            .generate(GenerationRequest::from_prompt("expensive prompt"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BudgetExceeded { .. }));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_records_exchange_and_sticks_to_provider() {
        let h = harness(vec![Ok(ScriptedAdapter::ok_output("chat reply"))]);
        let mut req = GenerationRequest::from_prompt("first question");
        req.session_id = Some("s-1".to_string());
        req.provider = Some("secondary".to_string());
        let result = h.gateway.dispatch(req).await.unwrap();
        assert_eq!(result.provider, "secondary");

        let mut followup = GenerationRequest::from_prompt("second question");
        followup.session_id = Some("s-1".to_string());
        let result = h.gateway.dispatch(followup).await.unwrap();
        // No provider named: the conversation's provider carries over.
        assert_eq!(result.provider, "secondary");

        let (conversation, messages) = h.gateway.history("s-1", None).await.unwrap();
        assert_eq!(conversation.message_count, 4);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "first question");

        // The chat result links back to the conversation and both
        // appended messages.
        let meta = result.metadata.unwrap();
        assert_eq!(meta["conversation_id"], json!(conversation.id));
        assert_eq!(meta["message_count"], json!(4));
        assert_eq!(meta["assistant_message_id"], json!(messages[3].id));
    }

    #[tokio::test]
    async fn test_chat_failure_is_recorded_with_zero_cost() {
        let h = harness(vec![Err(ProviderError::AuthFailed)]);
        let mut req = GenerationRequest::from_prompt("doomed");
        req.session_id = Some("s-1".to_string());
        assert!(h.gateway.chat(req).await.is_err());

        let (conversation, messages) = h.gateway.history("s-1", None).await.unwrap();
        assert_eq!(conversation.total_cost, 0.0);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("authentication failed"));
    }

    #[tokio::test]
    async fn test_compare_reports_each_provider() {
        let h = harness(vec![]);
        let entries = h
            .gateway
            .compare(
                &GenerationRequest::from_prompt("compare me"),
                &["primary".to_string(), "missing".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        let primary = entries.iter().find(|e| e.provider == "primary").unwrap();
        assert!(primary.success);
        let missing = entries.iter().find(|e| e.provider == "missing").unwrap();
        assert!(!missing.success);
        assert!(missing.error.as_deref().unwrap().contains("unknown provider"));
    }

    #[tokio::test]
    async fn test_estimate_projects_cost_without_dispatching() {
        let h = harness(vec![]);
        let mut req = GenerationRequest::from_prompt("abcdefgh");
        req.max_tokens = Some(100);
        let report = h.gateway.estimate(&req).unwrap();
        assert_eq!(report.provider, "primary");
        assert_eq!(report.estimated_input_tokens, 2);
        assert_eq!(report.max_output_tokens, 100);
        // (2 + 100) tokens at $1 per million.
        assert!((report.estimated_cost - 0.000102).abs() < 1e-9);
        assert!(report.within_budget);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_usage_reflects_dispatch_outcomes() {
        let h = harness(vec![Ok(ScriptedAdapter::ok_output("ok"))]);
        h.gateway
            .generate(GenerationRequest::from_prompt("one"))
            .await
            .unwrap();
        h.gateway
            .generate(GenerationRequest::from_prompt("one"))
            .await
            .unwrap();

        let stats = h.gateway.usage(PeriodType::Day, None, Some("primary"));
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].request_count, 2);
        assert_eq!(stats[0].successful_requests, 2);
        // Only the live call carries cost.
        assert!((stats[0].total_cost - 0.00003).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_health_report_probes_adapters() {
        let h = harness(vec![]);
        let health = h.gateway.health_report().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.providers.len(), 2);
        assert!(health.providers.iter().all(|p| p.healthy));
        assert!(health.providers.iter().all(|p| p.latency_ms == Some(5)));
    }

    #[tokio::test]
    async fn test_list_models_goes_through_the_adapter() {
        let h = harness(vec![]);
        let models = h.gateway.list_models("primary").await.unwrap();
        assert_eq!(models, vec!["test-model".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_single_flight() {
        let h = Arc::new(harness(vec![Ok(ScriptedAdapter::ok_output("shared"))]));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = Arc::clone(&h);
            handles.push(tokio::spawn(async move {
                h.gateway
                    .generate(GenerationRequest::from_prompt("identical"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.content, "shared");
        }
        // One live call served every concurrent request.
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_followers_of_a_failed_leader_count_in_usage() {
        let h = Arc::new(harness(vec![]));
        let key = fingerprint(
            "primary",
            "test-model",
            "shared fate",
            None,
            DEFAULT_MAX_TOKENS,
            None,
        );
        let guard = match h.gateway.cache.begin(&key) {
            CacheDecision::Leader(guard) => guard,
            _ => panic!("expected to lead the flight"),
        };

        let follower = {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.gateway
                    .generate(GenerationRequest::from_prompt("shared fate"))
                    .await
            })
        };
        // Let the follower subscribe before the leader settles.
        sleep(Duration::from_millis(50)).await;
        guard.fail(Arc::new(GatewayError::Provider {
            provider: "primary".to_string(),
            attempts: 1,
            source: ProviderError::Unknown("boom".into()),
        }));

        let err = follower.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::Provider { .. }));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        // The failed follower still shows up in the analytics, with no
        // cost attributed to it.
        let stats = h.gateway.usage(PeriodType::Day, None, Some("primary"));
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].request_count, 1);
        assert_eq!(stats[0].successful_requests, 0);
        assert_eq!(stats[0].total_cost, 0.0);
    }

    /// Fails once, hangs on the second call, then answers.
    struct StallingAdapter {
        calls: Arc<AtomicU32>,
    }

    impl ProviderAdapter for StallingAdapter {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn generate(
            &self,
            _request: &ResolvedRequest,
        ) -> Result<GenerationOutput, ProviderError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(ProviderError::Unknown("cold start".into())),
                1 => std::future::pending().await,
                _ => Ok(ScriptedAdapter::ok_output("recovered")),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["test-model".to_string()])
        }

        async fn health_check(&self) -> Result<ProbeReport, ProviderError> {
            Ok(ProbeReport {
                healthy: true,
                latency_ms: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_cancelled_half_open_call_frees_the_probe_slot() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory: AdapterFactory = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_settings, _key| {
                Ok(BoxAdapter::new(StallingAdapter {
                    calls: Arc::clone(&calls),
                }))
            })
        };
        let mut config = base_config();
        config.cache.enabled = false;
        config.breaker.failure_threshold = 1;
        config.breaker.cooldown_secs = 0;
        config.breaker.max_cooldown_secs = 0;
        let gateway = Gateway::new(
            config,
            factory,
            flat_pricing(),
            Arc::new(InMemoryConversationRepository::new()),
        );

        // First call fails and opens the circuit.
        let err = gateway
            .generate(GenerationRequest::from_prompt("warm up"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Provider { .. }));

        // Second call wins the half-open probe slot, then gets cancelled
        // while the adapter hangs.
        let probe = gateway.generate(GenerationRequest::from_prompt("hangs"));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), probe)
                .await
                .is_err()
        );

        // The abandoned slot is released, so the next call probes and
        // closes the circuit instead of seeing CircuitOpen forever.
        let result = gateway
            .generate(GenerationRequest::from_prompt("after the stall"))
            .await
            .unwrap();
        assert_eq!(result.content, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
