//! Provider management HTTP handlers.
//!
//! Endpoints:
//! - GET  /api/v1/providers                 - Status of every provider
//! - POST /api/v1/providers/{name}/enable   - Enable (optionally with a key)
//! - POST /api/v1/providers/{name}/disable  - Disable
//! - GET  /api/v1/providers/{name}/models   - Models the backend reports

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use tollgate_types::provider::ProviderStatus;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/providers - Live status of every configured provider.
pub async fn list_providers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ProviderStatus>>>, AppError> {
    Ok(Json(ApiResponse::success(state.gateway.provider_statuses())))
}

/// Optional request body for enabling a provider.
#[derive(Debug, Deserialize)]
pub struct EnableRequest {
    /// Fresh API key; rebuilds the provider's adapter when present.
    pub api_key: Option<String>,
    /// New default model for the provider.
    pub model: Option<String>,
}

/// POST /api/v1/providers/{name}/enable - Enable a provider.
pub async fn enable_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<EnableRequest>>,
) -> Result<Json<ApiResponse<ProviderStatus>>, AppError> {
    let api_key = body.as_ref().and_then(|b| b.api_key.as_deref());
    let model = body.as_ref().and_then(|b| b.model.as_deref());
    let status = state
        .gateway
        .set_provider_enabled(&name, true, api_key, model)?;
    Ok(Json(ApiResponse::success(status)))
}

/// POST /api/v1/providers/{name}/disable - Disable a provider.
pub async fn disable_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ProviderStatus>>, AppError> {
    let status = state.gateway.set_provider_enabled(&name, false, None, None)?;
    Ok(Json(ApiResponse::success(status)))
}

/// GET /api/v1/providers/{name}/models - Models reported by the backend.
pub async fn list_models(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Vec<String>>>, AppError> {
    let models = state.gateway.list_models(&name).await?;
    Ok(Json(ApiResponse::success(models)))
}
