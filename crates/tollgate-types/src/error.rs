//! Gateway and repository error taxonomy.

use thiserror::Error;

use crate::llm::ProviderError;

/// Errors surfaced by the dispatch pipeline and conversation service.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed request, rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid provider credential, or disabled provider.
    #[error("auth error: {0}")]
    Auth(String),

    /// Reserving the estimate would breach the provider's daily cap.
    /// No state change was made.
    #[error(
        "budget exceeded for '{provider}': estimated ${estimated:.6}, remaining ${remaining:.6}"
    )]
    BudgetExceeded {
        provider: String,
        estimated: f64,
        remaining: f64,
    },

    /// The provider's circuit is open; the adapter was never invoked.
    #[error("circuit open for '{provider}', retry in {retry_in_ms}ms")]
    CircuitOpen { provider: String, retry_in_ms: u64 },

    /// Adapter failure after the dispatcher's retry policy was exhausted
    /// (or immediately, for non-retryable errors).
    #[error("provider '{provider}' failed after {attempts} attempt(s): {source}")]
    Provider {
        provider: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// Non-fatal cache failure; dispatch falls through to a live call.
    #[error("cache error: {0}")]
    Cache(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from repository operations (traits defined in tollgate-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
