//! Usage analytics events and time-bucketed statistics.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of an aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Hour,
    Day,
    Month,
}

impl PeriodType {
    /// Truncate a timestamp to the start of its bucket.
    ///
    /// Buckets are UTC-aligned: hour boundaries, UTC midnight, or the
    /// first of the month. Every timestamp maps to exactly one bucket,
    /// so buckets are non-overlapping and exhaustive.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let naive = match self {
            PeriodType::Hour => date.and_time(
                NaiveTime::from_hms_opt(ts.hour(), 0, 0).unwrap_or(NaiveTime::MIN),
            ),
            PeriodType::Day => date.and_time(NaiveTime::MIN),
            PeriodType::Month => date
                .with_day(1)
                .unwrap_or(date)
                .and_time(NaiveTime::MIN),
        };
        Utc.from_utc_datetime(&naive)
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodType::Hour => write!(f, "hour"),
            PeriodType::Day => write!(f, "day"),
            PeriodType::Month => write!(f, "month"),
        }
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(PeriodType::Hour),
            "day" => Ok(PeriodType::Day),
            "month" => Ok(PeriodType::Month),
            other => Err(format!("invalid period type: '{other}'")),
        }
    }
}

/// One dispatch outcome, as consumed by the analytics aggregator.
///
/// Emitted for every outcome: success, cache hit, or failure. `cost` is
/// the committed cost (zero for cache hits and failures).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub success: bool,
    pub cached: bool,
    pub cost: f64,
    pub latency_ms: u64,
}

/// Aggregated statistics for one (period, bucket, provider, model) cell.
///
/// Derived from the event stream, never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStat {
    pub period: PeriodType,
    pub bucket_start: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub request_count: u64,
    pub successful_requests: u64,
    pub total_cost: f64,
    pub average_response_time_ms: f64,
}
