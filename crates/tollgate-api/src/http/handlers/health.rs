//! Gateway health HTTP handler.
//!
//! GET /api/v1/health - Probe every provider and report the aggregate.

use axum::Json;
use axum::extract::State;

use tollgate_core::dispatch::GatewayHealth;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/health - Probe all providers and report per-provider
/// health plus circuit state.
pub async fn get_health(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<GatewayHealth>>, AppError> {
    let report = state.gateway.health_report().await;
    Ok(Json(ApiResponse::success(report)))
}
