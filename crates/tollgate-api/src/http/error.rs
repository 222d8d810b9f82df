//! Application error type mapping gateway errors to HTTP status codes
//! and the envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tollgate_types::error::GatewayError;
use tollgate_types::llm::ProviderError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Gateway pipeline errors (dispatch, budgets, breakers, providers).
    Gateway(GatewayError),
    /// Validation error raised at the HTTP layer.
    Validation(String),
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        AppError::Gateway(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::Gateway(GatewayError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
            AppError::Gateway(GatewayError::Auth(msg)) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None)
            }
            AppError::Gateway(err @ GatewayError::BudgetExceeded {
                provider,
                estimated,
                remaining,
            }) => (
                StatusCode::PAYMENT_REQUIRED,
                "BUDGET_EXCEEDED",
                err.to_string(),
                Some(json!({
                    "provider": provider,
                    "estimated_cost": estimated,
                    "remaining_budget": remaining,
                })),
            ),
            AppError::Gateway(err @ GatewayError::CircuitOpen {
                provider,
                retry_in_ms,
            }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CIRCUIT_OPEN",
                err.to_string(),
                Some(json!({
                    "provider": provider,
                    "retry_in_ms": retry_in_ms,
                })),
            ),
            AppError::Gateway(err @ GatewayError::Provider { source, attempts, .. }) => {
                // A bad model name is the caller's mistake, not an
                // upstream outage.
                let status = match source {
                    ProviderError::InvalidModel(_) => StatusCode::BAD_REQUEST,
                    ProviderError::AuthFailed => StatusCode::UNAUTHORIZED,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (
                    status,
                    "PROVIDER_ERROR",
                    err.to_string(),
                    Some(json!({ "attempts": attempts })),
                )
            }
            AppError::Gateway(GatewayError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None)
            }
            AppError::Gateway(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
        };

        let body = json!({
            "success": false,
            "message": message,
            "errors": [{
                "code": code,
                "message": message,
                "details": details,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_gateway_errors_map_to_statuses() {
        assert_eq!(
            status_of(AppError::Gateway(GatewayError::Validation("bad".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::Gateway(GatewayError::BudgetExceeded {
                provider: "anthropic".into(),
                estimated: 0.2,
                remaining: 0.1,
            })),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(AppError::Gateway(GatewayError::CircuitOpen {
                provider: "anthropic".into(),
                retry_in_ms: 500,
            })),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::Gateway(GatewayError::NotFound("nope".into()))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_provider_error_status_depends_on_source() {
        let invalid_model = AppError::Gateway(GatewayError::Provider {
            provider: "openai".into(),
            attempts: 1,
            source: ProviderError::InvalidModel("gpt-9".into()),
        });
        assert_eq!(status_of(invalid_model), StatusCode::BAD_REQUEST);

        let timeout = AppError::Gateway(GatewayError::Provider {
            provider: "openai".into(),
            attempts: 3,
            source: ProviderError::Timeout,
        });
        assert_eq!(status_of(timeout), StatusCode::BAD_GATEWAY);
    }
}
