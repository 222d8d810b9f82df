//! Usage analytics HTTP handler.
//!
//! GET /api/v1/usage - Aggregated usage stats with period granularity.

use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use tollgate_types::usage::{PeriodType, UsageStat};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Query parameters for usage aggregation.
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Bucket granularity: "hour", "day", or "month". Defaults to day.
    pub period: Option<String>,
    /// Only buckets starting at or after this instant (RFC 3339).
    pub since: Option<DateTime<Utc>>,
    /// Restrict to one provider.
    pub provider: Option<String>,
}

fn parse_period(s: Option<&str>) -> Result<PeriodType, AppError> {
    match s {
        None | Some("day") => Ok(PeriodType::Day),
        Some("hour") => Ok(PeriodType::Hour),
        Some("month") => Ok(PeriodType::Month),
        Some(other) => Err(AppError::Validation(format!(
            "invalid period '{other}', expected hour, day, or month"
        ))),
    }
}

/// GET /api/v1/usage - Aggregated usage stats.
pub async fn get_usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<ApiResponse<Vec<UsageStat>>>, AppError> {
    let period = parse_period(query.period.as_deref())?;
    let stats = state
        .gateway
        .usage(period, query.since, query.provider.as_deref());
    Ok(Json(ApiResponse::success(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_period_defaults_to_day() {
        assert!(matches!(parse_period(None), Ok(PeriodType::Day)));
        assert!(matches!(parse_period(Some("hour")), Ok(PeriodType::Hour)));
        assert!(matches!(parse_period(Some("month")), Ok(PeriodType::Month)));
        assert!(parse_period(Some("week")).is_err());
    }
}
