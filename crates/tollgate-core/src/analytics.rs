//! In-process usage aggregation.
//!
//! Every dispatched request is folded into hourly, daily and monthly
//! buckets keyed by provider and model. Buckets hold running totals and a
//! running mean of response latency, so queries are O(buckets) with no
//! per-request history retained.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use tollgate_types::usage::{PeriodType, UsageEvent, UsageStat};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    period: PeriodType,
    bucket_start: DateTime<Utc>,
    provider: String,
    model: String,
}

#[derive(Debug, Default)]
struct Bucket {
    request_count: u64,
    successful_requests: u64,
    total_cost: f64,
    mean_latency_ms: f64,
}

impl Bucket {
    fn fold(&mut self, event: &UsageEvent) {
        self.request_count += 1;
        if event.success {
            self.successful_requests += 1;
        }
        self.total_cost += event.cost;
        // Incremental mean keeps the bucket O(1) in memory.
        let n = self.request_count as f64;
        self.mean_latency_ms += (event.latency_ms as f64 - self.mean_latency_ms) / n;
    }
}

/// Thread-safe aggregator shared across the dispatch path.
pub struct UsageAggregator {
    buckets: DashMap<BucketKey, Bucket>,
}

impl UsageAggregator {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Fold one request outcome into all three period granularities.
    pub fn record(&self, event: &UsageEvent) {
        for period in [PeriodType::Hour, PeriodType::Day, PeriodType::Month] {
            let key = BucketKey {
                period,
                bucket_start: period.bucket_start(event.timestamp),
                provider: event.provider.clone(),
                model: event.model.clone(),
            };
            self.buckets.entry(key).or_default().fold(event);
        }
    }

    /// Return stats for one period granularity, optionally filtered by
    /// provider and lower time bound, sorted by bucket start then provider
    /// and model.
    pub fn query(
        &self,
        period: PeriodType,
        since: Option<DateTime<Utc>>,
        provider: Option<&str>,
    ) -> Vec<UsageStat> {
        let mut stats: Vec<UsageStat> = self
            .buckets
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.period == period
                    && since.is_none_or(|s| key.bucket_start >= s)
                    && provider.is_none_or(|p| key.provider == p)
            })
            .map(|entry| {
                let key = entry.key();
                let bucket = entry.value();
                UsageStat {
                    period,
                    bucket_start: key.bucket_start,
                    provider: key.provider.clone(),
                    model: key.model.clone(),
                    request_count: bucket.request_count,
                    successful_requests: bucket.successful_requests,
                    total_cost: bucket.total_cost,
                    average_response_time_ms: bucket.mean_latency_ms,
                }
            })
            .collect();

        stats.sort_by(|a, b| {
            a.bucket_start
                .cmp(&b.bucket_start)
                .then_with(|| a.provider.cmp(&b.provider))
                .then_with(|| a.model.cmp(&b.model))
        });
        stats
    }
}

impl Default for UsageAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(ts: DateTime<Utc>, provider: &str, success: bool, cost: f64, ms: u64) -> UsageEvent {
        UsageEvent {
            timestamp: ts,
            provider: provider.to_string(),
            model: "m1".to_string(),
            success,
            cached: false,
            cost,
            latency_ms: ms,
        }
    }

    #[test]
    fn test_events_in_same_hour_share_a_bucket() {
        let agg = UsageAggregator::new();
        let ts = Utc.with_ymd_and_hms(2026, 8, 29, 14, 5, 0).unwrap();
        agg.record(&event(ts, "anthropic", true, 0.01, 100));
        agg.record(&event(
            ts + chrono::Duration::minutes(30),
            "anthropic",
            false,
            0.0,
            300,
        ));

        let stats = agg.query(PeriodType::Hour, None, None);
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.request_count, 2);
        assert_eq!(s.successful_requests, 1);
        assert!((s.total_cost - 0.01).abs() < 1e-9);
        assert!((s.average_response_time_ms - 200.0).abs() < 1e-9);
        assert_eq!(
            s.bucket_start,
            Utc.with_ymd_and_hms(2026, 8, 29, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_rollup_spans_hours() {
        let agg = UsageAggregator::new();
        let base = Utc.with_ymd_and_hms(2026, 8, 29, 9, 0, 0).unwrap();
        agg.record(&event(base, "ollama", true, 0.0, 50));
        agg.record(&event(base + chrono::Duration::hours(5), "ollama", true, 0.0, 150));

        assert_eq!(agg.query(PeriodType::Hour, None, None).len(), 2);
        let daily = agg.query(PeriodType::Day, None, None);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].request_count, 2);
    }

    #[test]
    fn test_provider_filter_and_since_bound() {
        let agg = UsageAggregator::new();
        let old = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2026, 8, 29, 0, 0, 0).unwrap();
        agg.record(&event(old, "anthropic", true, 0.02, 90));
        agg.record(&event(new, "anthropic", true, 0.03, 110));
        agg.record(&event(new, "openai", true, 0.04, 120));

        let filtered = agg.query(PeriodType::Day, Some(new), Some("anthropic"));
        assert_eq!(filtered.len(), 1);
        assert!((filtered[0].total_cost - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_results_sorted_by_bucket_then_provider() {
        let agg = UsageAggregator::new();
        let ts = Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap();
        agg.record(&event(ts, "openai", true, 0.01, 100));
        agg.record(&event(ts, "anthropic", true, 0.01, 100));

        let stats = agg.query(PeriodType::Hour, None, None);
        assert_eq!(stats[0].provider, "anthropic");
        assert_eq!(stats[1].provider, "openai");
    }
}
