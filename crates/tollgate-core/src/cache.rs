//! Content-addressed response cache with single-flight coordination.
//!
//! Completions are cached under a deterministic fingerprint of
//! {provider, model, normalized prompt, generation parameters}. While no
//! entry exists for a fingerprint, concurrent identical requests collapse
//! into one upstream call: the first caller becomes the leader and holds a
//! [`FlightGuard`]; everyone else becomes a follower awaiting the leader's
//! broadcast outcome. Entries are immutable, expire after a TTL checked
//! lazily on read, and a fingerprint maps to at most one live entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use tollgate_types::config::CacheConfig;
use tollgate_types::error::GatewayError;
use tollgate_types::llm::GenerationResult;

/// Outcome shared between a flight leader and its followers.
pub type FlightOutcome = Result<GenerationResult, Arc<GatewayError>>;

/// Compute the cache fingerprint for a request.
///
/// The prompt is normalized by trimming surrounding whitespace; float
/// parameters are rendered with fixed precision so equal values always
/// hash equally.
pub fn fingerprint(
    provider: &str,
    model: &str,
    prompt: &str,
    temperature: Option<f64>,
    max_tokens: u32,
    top_p: Option<f64>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"\n");
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(prompt.trim().as_bytes());
    hasher.update(b"\n");
    match temperature {
        Some(t) => hasher.update(format!("{t:.4}").as_bytes()),
        None => hasher.update(b"-"),
    }
    hasher.update(b"\n");
    hasher.update(max_tokens.to_string().as_bytes());
    hasher.update(b"\n");
    match top_p {
        Some(p) => hasher.update(format!("{p:.4}").as_bytes()),
        None => hasher.update(b"-"),
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

enum Slot {
    Ready {
        result: GenerationResult,
        expires_at: Instant,
    },
    Pending {
        tx: broadcast::Sender<FlightOutcome>,
    },
}

/// What a caller should do after consulting the cache.
pub enum CacheDecision {
    /// A live entry exists; respond immediately.
    Hit(GenerationResult),
    /// No entry and no flight in progress; the caller must execute the
    /// upstream call and settle the guard.
    Leader(FlightGuard),
    /// Another caller is already executing this fingerprint; await its
    /// outcome.
    Follower(broadcast::Receiver<FlightOutcome>),
    /// Caching is disabled; execute without coordination.
    Bypass,
}

/// Single-flighted completion cache.
pub struct ResponseCache {
    slots: Arc<DashMap<String, Slot>>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            enabled: config.enabled,
        }
    }

    /// Look up a fingerprint and either return the hit or join/lead the
    /// flight for it.
    pub fn begin(&self, fingerprint: &str) -> CacheDecision {
        if !self.enabled {
            return CacheDecision::Bypass;
        }

        match self.slots.entry(fingerprint.to_string()) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::Ready { result, expires_at } => {
                        if Instant::now() < *expires_at {
                            let mut hit = result.clone();
                            hit.cached = true;
                            hit.processing_time_ms = 0;
                            return CacheDecision::Hit(hit);
                        }
                        // Expired entry: fall through and take leadership.
                    }
                    Slot::Pending { tx } => {
                        return CacheDecision::Follower(tx.subscribe());
                    }
                }
                let (tx, _rx) = broadcast::channel(4);
                occupied.insert(Slot::Pending { tx: tx.clone() });
                CacheDecision::Leader(self.guard(fingerprint, tx))
            }
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(4);
                vacant.insert(Slot::Pending { tx: tx.clone() });
                CacheDecision::Leader(self.guard(fingerprint, tx))
            }
        }
    }

    fn guard(&self, fingerprint: &str, tx: broadcast::Sender<FlightOutcome>) -> FlightGuard {
        FlightGuard {
            slots: Arc::clone(&self.slots),
            fingerprint: fingerprint.to_string(),
            tx,
            ttl: self.ttl,
            settled: false,
        }
    }

    /// Number of live (non-pending) entries. Test/introspection helper.
    pub fn ready_entries(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready { .. }))
            .count()
    }
}

/// Leadership handle for one in-flight fingerprint.
///
/// The leader must settle the guard with [`complete`](Self::complete) or
/// [`fail`](Self::fail). Dropping it unsettled (cancellation) removes the
/// pending slot and releases every follower with a cache error, so no
/// half-written entry is ever observable.
pub struct FlightGuard {
    slots: Arc<DashMap<String, Slot>>,
    fingerprint: String,
    tx: broadcast::Sender<FlightOutcome>,
    ttl: Duration,
    settled: bool,
}

impl FlightGuard {
    /// Publish a successful result to followers and write the cache entry.
    pub fn complete(mut self, result: &GenerationResult) {
        self.settled = true;
        match self.slots.entry(self.fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                let _ = self.tx.send(Ok(result.clone()));
                occupied.insert(Slot::Ready {
                    result: result.clone(),
                    expires_at: Instant::now() + self.ttl,
                });
            }
            Entry::Vacant(_) => {
                let _ = self.tx.send(Ok(result.clone()));
            }
        }
    }

    /// Publish a failure to followers and remove the pending slot, so the
    /// next request for this fingerprint retries upstream.
    pub fn fail(mut self, error: Arc<GatewayError>) {
        self.settled = true;
        self.resolve_with_error(error);
    }

    fn resolve_with_error(&mut self, error: Arc<GatewayError>) {
        if let Entry::Occupied(occupied) = self.slots.entry(self.fingerprint.clone()) {
            let _ = self.tx.send(Err(error));
            occupied.remove();
        } else {
            let _ = self.tx.send(Err(error));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.settled = true;
            self.resolve_with_error(Arc::new(GatewayError::Cache(
                "in-flight request was cancelled before completion".to_string(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn cache_config(ttl_secs: u64) -> CacheConfig {
        CacheConfig {
            enabled: true,
            ttl_secs,
        }
    }

    fn sample_result() -> GenerationResult {
        GenerationResult {
            request_id: Uuid::now_v7(),
            response_id: Uuid::now_v7(),
            content: "four".to_string(),
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4".to_string(),
            tokens_used: 12,
            cost: 0.000123,
            cached: false,
            processing_time_ms: 250,
            metadata: None,
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_parameter_sensitive() {
        let a = fingerprint("p", "m", "  2+2?  ", Some(0.7), 100, None);
        let b = fingerprint("p", "m", "2+2?", Some(0.7), 100, None);
        assert_eq!(a, b, "prompt normalization should trim whitespace");

        let c = fingerprint("p", "m", "2+2?", Some(0.8), 100, None);
        assert_ne!(a, c, "temperature must change the fingerprint");

        let d = fingerprint("p", "other-model", "2+2?", Some(0.7), 100, None);
        assert_ne!(a, d);
    }

    #[test]
    fn test_miss_then_hit_roundtrip() {
        let cache = ResponseCache::new(&cache_config(60));
        let fp = fingerprint("p", "m", "2+2?", None, 100, None);

        let CacheDecision::Leader(guard) = cache.begin(&fp) else {
            panic!("first begin must lead");
        };
        guard.complete(&sample_result());

        let CacheDecision::Hit(hit) = cache.begin(&fp) else {
            panic!("second begin must hit");
        };
        assert_eq!(hit.content, "four");
        assert!(hit.cached);
        assert_eq!(hit.processing_time_ms, 0);
        // Nominal cost is preserved for reporting parity.
        assert!((hit.cost - 0.000123).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_live_miss() {
        let cache = ResponseCache::new(&cache_config(0));
        let fp = fingerprint("p", "m", "2+2?", None, 100, None);

        let CacheDecision::Leader(guard) = cache.begin(&fp) else {
            panic!("first begin must lead");
        };
        guard.complete(&sample_result());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(
            matches!(cache.begin(&fp), CacheDecision::Leader(_)),
            "read after expiry must be a miss that takes leadership"
        );
    }

    #[tokio::test]
    async fn test_followers_share_the_leaders_result() {
        let cache = ResponseCache::new(&cache_config(60));
        let fp = fingerprint("p", "m", "2+2?", None, 100, None);

        let CacheDecision::Leader(guard) = cache.begin(&fp) else {
            panic!("first begin must lead");
        };

        let mut followers = Vec::new();
        for _ in 0..5 {
            match cache.begin(&fp) {
                CacheDecision::Follower(rx) => followers.push(rx),
                _ => panic!("concurrent identical requests must follow"),
            }
        }

        guard.complete(&sample_result());

        for mut rx in followers {
            let outcome = rx.recv().await.unwrap();
            assert_eq!(outcome.unwrap().content, "four");
        }
    }

    #[tokio::test]
    async fn test_leader_failure_releases_followers_and_slot() {
        let cache = ResponseCache::new(&cache_config(60));
        let fp = fingerprint("p", "m", "2+2?", None, 100, None);

        let CacheDecision::Leader(guard) = cache.begin(&fp) else {
            panic!("first begin must lead");
        };
        let CacheDecision::Follower(mut rx) = cache.begin(&fp) else {
            panic!("second begin must follow");
        };

        guard.fail(Arc::new(GatewayError::Internal("boom".to_string())));

        let outcome = rx.recv().await.unwrap();
        assert!(outcome.is_err());

        // The slot was removed, so the next request retries upstream.
        assert!(matches!(cache.begin(&fp), CacheDecision::Leader(_)));
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_followers_with_error() {
        let cache = ResponseCache::new(&cache_config(60));
        let fp = fingerprint("p", "m", "2+2?", None, 100, None);

        let CacheDecision::Leader(guard) = cache.begin(&fp) else {
            panic!("first begin must lead");
        };
        let CacheDecision::Follower(mut rx) = cache.begin(&fp) else {
            panic!("second begin must follow");
        };

        drop(guard);

        let outcome = rx.recv().await.unwrap();
        let err = outcome.unwrap_err();
        assert!(matches!(&*err, GatewayError::Cache(_)));
        assert_eq!(cache.ready_entries(), 0);
    }

    #[test]
    fn test_disabled_cache_bypasses() {
        let cache = ResponseCache::new(&CacheConfig {
            enabled: false,
            ttl_secs: 60,
        });
        let fp = fingerprint("p", "m", "2+2?", None, 100, None);
        assert!(matches!(cache.begin(&fp), CacheDecision::Bypass));
    }
}
