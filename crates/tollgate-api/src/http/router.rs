//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Generation
        .route("/generate", post(handlers::generate::generate))
        .route("/estimate", post(handlers::generate::estimate))
        .route("/compare", post(handlers::generate::compare))
        // Chat
        .route("/chat/messages", post(handlers::chat::send_message))
        .route(
            "/chat/{session_id}/history",
            get(handlers::chat::get_history),
        )
        // Providers
        .route("/providers", get(handlers::provider::list_providers))
        .route(
            "/providers/{name}/enable",
            post(handlers::provider::enable_provider),
        )
        .route(
            "/providers/{name}/disable",
            post(handlers::provider::disable_provider),
        )
        .route(
            "/providers/{name}/models",
            get(handlers::provider::list_models),
        )
        // Analytics
        .route("/usage", get(handlers::usage::get_usage))
        // Health
        .route("/health", get(handlers::health::get_health));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(liveness))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple liveness endpoint (no provider probes).
async fn liveness() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
