//! Per-provider circuit breaker.
//!
//! Explicit CLOSED -> OPEN -> HALF_OPEN -> CLOSED state machine guarding a
//! provider. The circuit opens after a run of consecutive failures; while
//! open, every call is rejected without touching the adapter. When the
//! cooldown elapses exactly one probe call is admitted; its success closes
//! the circuit, its failure reopens it with an exponentially extended,
//! capped cooldown.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use tollgate_types::config::BreakerConfig;
use tollgate_types::llm::ProviderError;

#[derive(Debug, Clone)]
enum State {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        opened_at: Instant,
        cooldown: Duration,
    },
    HalfOpen {
        probe_in_flight: bool,
    },
}

#[derive(Debug)]
struct Inner {
    state: State,
    /// Cooldown to apply the next time the circuit opens from HALF_OPEN.
    next_cooldown: Duration,
    total_calls: u64,
    total_failures: u64,
    last_error: Option<String>,
}

/// Decision for a call attempting to pass the breaker.
pub enum Admission<'a> {
    /// Call may proceed; settle the guard with `success` or `failure`.
    Allowed(AdmissionGuard<'a>),
    /// Circuit is open (or the probe slot is taken); reject without
    /// invoking the adapter.
    Rejected { retry_in_ms: u64 },
}

/// RAII handle for one admitted call.
///
/// Dropping the guard unsettled (the caller's future was cancelled
/// between admission and the adapter outcome) releases a held HALF_OPEN
/// probe slot so the next caller can probe again.
pub struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl AdmissionGuard<'_> {
    /// Whether this admission is the single HALF_OPEN probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Settle the admission as a success.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Settle the admission as a failure.
    pub fn failure(mut self, error: &ProviderError) {
        self.settled = true;
        self.breaker.record_failure(error);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

/// Point-in-time view of breaker state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: &'static str,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
}

/// Failure-isolation state machine for one provider.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    base_cooldown: Duration,
    max_cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        let base_cooldown = Duration::from_secs(config.cooldown_secs);
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed {
                    consecutive_failures: 0,
                },
                next_cooldown: base_cooldown,
                total_calls: 0,
                total_failures: 0,
                last_error: None,
            }),
            failure_threshold: config.failure_threshold,
            base_cooldown,
            max_cooldown: Duration::from_secs(config.max_cooldown_secs),
        }
    }

    /// Gate a call. An `Allowed` admission carries a guard that is
    /// settled exactly once; an unsettled drop frees the probe slot.
    pub fn try_acquire(&self) -> Admission<'_> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            State::Closed { .. } => Admission::Allowed(self.guard(false)),
            State::Open { opened_at, cooldown } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= cooldown {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Admission::Allowed(self.guard(true))
                } else {
                    Admission::Rejected {
                        retry_in_ms: (cooldown - elapsed).as_millis() as u64,
                    }
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    Admission::Rejected {
                        retry_in_ms: self.base_cooldown.as_millis() as u64,
                    }
                } else {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Admission::Allowed(self.guard(true))
                }
            }
        }
    }

    fn guard(&self, probe: bool) -> AdmissionGuard<'_> {
        AdmissionGuard {
            breaker: self,
            probe,
            settled: false,
        }
    }

    /// Free the HALF_OPEN probe slot after a cancelled, unsettled probe.
    fn release_probe(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let State::HalfOpen {
            probe_in_flight: true,
        } = inner.state
        {
            inner.state = State::HalfOpen {
                probe_in_flight: false,
            };
        }
    }

    /// Record a successful call. Closes the circuit after a successful
    /// probe and resets the failure run and cooldown escalation.
    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total_calls += 1;
        inner.state = State::Closed {
            consecutive_failures: 0,
        };
        inner.next_cooldown = self.base_cooldown;
    }

    /// Record a failed call. Opens the circuit when the consecutive run
    /// reaches the threshold, or immediately on a failed probe (with an
    /// extended cooldown).
    fn record_failure(&self, error: &ProviderError) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total_calls += 1;
        inner.total_failures += 1;
        inner.last_error = Some(error.to_string());

        match inner.state {
            State::Closed {
                consecutive_failures,
            } => {
                let run = consecutive_failures + 1;
                if run >= self.failure_threshold {
                    inner.state = State::Open {
                        opened_at: Instant::now(),
                        cooldown: self.base_cooldown,
                    };
                    inner.next_cooldown =
                        (self.base_cooldown * 2).min(self.max_cooldown);
                } else {
                    inner.state = State::Closed {
                        consecutive_failures: run,
                    };
                }
            }
            State::HalfOpen { .. } => {
                let cooldown = inner.next_cooldown;
                inner.state = State::Open {
                    opened_at: Instant::now(),
                    cooldown,
                };
                inner.next_cooldown = (cooldown * 2).min(self.max_cooldown);
            }
            State::Open { .. } => {
                // Late failure report while already open; no transition.
            }
        }
    }

    pub fn state_name(&self) -> &'static str {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            State::Closed { .. } => "closed",
            State::Open { .. } => "open",
            State::HalfOpen { .. } => "half_open",
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        BreakerSnapshot {
            state: match inner.state {
                State::Closed { .. } => "closed",
                State::Open { .. } => "open",
                State::HalfOpen { .. } => "half_open",
            },
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            last_error: inner.last_error.clone(),
        }
    }
}
