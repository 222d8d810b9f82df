//! Generation, estimation, and comparison HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/generate  - Unified generation (chat when session_id is set)
//! - POST /api/v1/estimate  - Cost projection without dispatching
//! - POST /api/v1/compare   - Run one prompt against several providers

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use tollgate_core::dispatch::{CompareEntry, EstimateReport};
use tollgate_types::llm::{GenerationRequest, GenerationResult};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/generate - Dispatch a generation request.
///
/// Requests carrying a `session_id` run as conversational exchanges;
/// everything else is stateless.
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<ApiResponse<GenerationResult>>, AppError> {
    let result = state.gateway.dispatch(request).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// POST /api/v1/estimate - Project cost and budget headroom for a prompt.
pub async fn estimate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<ApiResponse<EstimateReport>>, AppError> {
    let report = state.gateway.estimate(&request)?;
    Ok(Json(ApiResponse::success(report)))
}

/// Request body for provider comparison.
#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    #[serde(flatten)]
    pub request: GenerationRequest,
    pub providers: Vec<String>,
}

/// Per-provider outcomes plus run totals.
#[derive(Debug, serde::Serialize)]
pub struct CompareResponse {
    pub results: Vec<CompareEntry>,
    pub providers_count: usize,
    pub successful_count: usize,
    pub total_cost: f64,
}

/// POST /api/v1/compare - Run one prompt against several providers
/// concurrently and report each outcome separately.
pub async fn compare(
    State(state): State<AppState>,
    Json(body): Json<CompareRequest>,
) -> Result<Json<ApiResponse<CompareResponse>>, AppError> {
    let results = state.gateway.compare(&body.request, &body.providers).await?;

    let successful_count = results.iter().filter(|r| r.success).count();
    let total_cost = results
        .iter()
        .filter_map(|r| r.result.as_ref().map(|g| g.cost))
        .sum();

    Ok(Json(ApiResponse::success(CompareResponse {
        providers_count: results.len(),
        successful_count,
        total_cost,
        results,
    })))
}
