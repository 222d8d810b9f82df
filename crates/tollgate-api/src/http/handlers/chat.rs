//! Conversational chat HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/chat/messages              - Send a message in a session
//! - GET  /api/v1/chat/{session_id}/history  - Conversation history

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use tollgate_types::conversation::{Conversation, StoredMessage};
use tollgate_types::llm::{GenerationRequest, GenerationResult};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/chat/messages - Run one conversational exchange.
///
/// The request must carry a `session_id`; the gateway serializes
/// exchanges per session and records both sides of the exchange in the
/// conversation log.
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<ApiResponse<GenerationResult>>, AppError> {
    if request.session_id.is_none() {
        return Err(AppError::Validation(
            "chat messages require a session_id".to_string(),
        ));
    }

    let result = state.gateway.chat(request).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Query parameters for history listing.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Keep only the most recent N messages (still chronological).
    pub limit: Option<i64>,
}

/// Conversation plus its message log.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub conversation: Conversation,
    pub messages: Vec<StoredMessage>,
}

/// GET /api/v1/chat/{session_id}/history - Message history for the
/// session's active conversation.
pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<HistoryResponse>>, AppError> {
    let (conversation, messages) = state.gateway.history(&session_id, query.limit).await?;
    Ok(Json(ApiResponse::success(HistoryResponse {
        conversation,
        messages,
    })))
}
