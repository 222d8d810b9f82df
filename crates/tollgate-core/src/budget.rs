//! Per-provider daily spend accounting.
//!
//! The guard enforces a daily USD ceiling with a reserve/commit/rollback
//! protocol: the dispatcher reserves a conservative estimate before the
//! adapter call and atomically replaces it with the actual cost on
//! completion. Dropping an uncommitted [`Reservation`] releases the full
//! estimate, so a cancelled or failed call never leaves spend partially
//! applied. The daily window is keyed by UTC date and resets lazily.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};

use tollgate_types::error::GatewayError;

use crate::estimate::round6;

#[derive(Debug)]
struct Window {
    day: NaiveDate,
    /// Sum of actual costs committed today.
    committed: f64,
    /// Sum of outstanding reservation estimates.
    reserved: f64,
    limit: f64,
}

impl Window {
    /// Reset counters when the UTC date has rolled over.
    fn roll(&mut self) {
        let today = Utc::now().date_naive();
        if self.day != today {
            self.day = today;
            self.committed = 0.0;
            self.reserved = 0.0;
        }
    }
}

/// Daily spend guard for one provider.
///
/// All reserve/commit/rollback operations take the same mutex, so
/// concurrent requests to one provider never race on the counter.
#[derive(Debug, Clone)]
pub struct BudgetGuard {
    provider: String,
    window: Arc<Mutex<Window>>,
}

impl BudgetGuard {
    pub fn new(provider: impl Into<String>, daily_limit: f64) -> Self {
        Self {
            provider: provider.into(),
            window: Arc::new(Mutex::new(Window {
                day: Utc::now().date_naive(),
                committed: 0.0,
                reserved: 0.0,
                limit: daily_limit,
            })),
        }
    }

    /// Reserve an estimated cost against today's counter.
    ///
    /// Fails with `BudgetExceeded` and makes no state change when
    /// `committed + reserved + estimate` would breach the daily limit.
    pub fn reserve(&self, estimate: f64) -> Result<Reservation, GatewayError> {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.roll();

        if window.committed + window.reserved + estimate > window.limit {
            let remaining =
                round6((window.limit - window.committed - window.reserved).max(0.0));
            return Err(GatewayError::BudgetExceeded {
                provider: self.provider.clone(),
                estimated: estimate,
                remaining,
            });
        }

        window.reserved += estimate;
        Ok(Reservation {
            window: Arc::clone(&self.window),
            estimate,
            settled: false,
        })
    }

    /// Actual spend committed today.
    pub fn current_spend(&self) -> f64 {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.roll();
        round6(window.committed)
    }

    pub fn daily_limit(&self) -> f64 {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .limit
    }

    pub fn set_daily_limit(&self, limit: f64) {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .limit = limit;
    }

    /// Budget still available for new reservations.
    pub fn remaining(&self) -> f64 {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.roll();
        round6((window.limit - window.committed - window.reserved).max(0.0))
    }
}

/// An outstanding budget reservation.
///
/// Either committed exactly once with the actual cost, or rolled back in
/// full on drop. Never partially applied.
#[derive(Debug)]
pub struct Reservation {
    window: Arc<Mutex<Window>>,
    estimate: f64,
    settled: bool,
}

impl Reservation {
    /// Atomically replace the reserved estimate with the actual cost.
    pub fn commit(mut self, actual: f64) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.reserved = (window.reserved - self.estimate).max(0.0);
        window.committed = round6(window.committed + actual);
        self.settled = true;
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
            window.reserved = (window.reserved - self.estimate).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_within_limit() {
        let guard = BudgetGuard::new("anthropic", 5.0);
        let reservation = guard.reserve(0.2).unwrap();
        assert_eq!(guard.current_spend(), 0.0);
        reservation.commit(0.15);
        assert!((guard.current_spend() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_reserve_rejects_over_limit_without_state_change() {
        // Spec example: limit $5.00, spend $4.90, estimate $0.20 -> rejected.
        let guard = BudgetGuard::new("anthropic", 5.0);
        guard.reserve(4.9).unwrap().commit(4.9);

        let err = guard.reserve(0.2).unwrap_err();
        assert!(matches!(err, GatewayError::BudgetExceeded { .. }));
        assert!((guard.current_spend() - 4.9).abs() < 1e-9);

        // A smaller request that fits still goes through.
        assert!(guard.reserve(0.05).is_ok());
    }

    #[test]
    fn test_outstanding_reservations_count_toward_limit() {
        let guard = BudgetGuard::new("openai", 1.0);
        let first = guard.reserve(0.6).unwrap();
        assert!(guard.reserve(0.6).is_err());
        drop(first);
        assert!(guard.reserve(0.6).is_ok());
    }

    #[test]
    fn test_drop_releases_full_reservation() {
        let guard = BudgetGuard::new("openai", 1.0);
        {
            let _reservation = guard.reserve(0.9).unwrap();
            assert!((guard.remaining() - 0.1).abs() < 1e-9);
        }
        assert!((guard.remaining() - 1.0).abs() < 1e-9);
        assert_eq!(guard.current_spend(), 0.0);
    }

    #[test]
    fn test_commit_replaces_estimate_with_actual() {
        let guard = BudgetGuard::new("openai", 1.0);
        let reservation = guard.reserve(0.5).unwrap();
        reservation.commit(0.1);
        assert!((guard.current_spend() - 0.1).abs() < 1e-9);
        assert!((guard.remaining() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_reservations_never_overshoot() {
        let guard = BudgetGuard::new("openai", 1.0);
        let mut handles = Vec::new();
        // 0.125 is exactly representable, so eight of them fill $1.00 exactly.
        for _ in 0..20 {
            let g = guard.clone();
            handles.push(std::thread::spawn(move || {
                if let Ok(r) = g.reserve(0.125) {
                    r.commit(0.125);
                    true
                } else {
                    false
                }
            }));
        }
        let committed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(committed, 8, "exactly $1.00 worth of work should fit");
        let spend = guard.current_spend();
        assert!(
            spend <= 1.0 + 1e-9,
            "daily spend {spend} exceeded the $1.00 limit"
        );
    }

    #[test]
    fn test_set_daily_limit() {
        let guard = BudgetGuard::new("local", 0.0);
        assert!(guard.reserve(0.01).is_err());
        guard.set_daily_limit(1.0);
        assert!(guard.reserve(0.01).is_ok());
    }

    #[test]
    fn test_zero_cost_reservation_always_fits() {
        let guard = BudgetGuard::new("local", 0.0);
        // Local inference estimates $0; reserving zero must succeed.
        assert!(guard.reserve(0.0).is_ok());
    }
}
