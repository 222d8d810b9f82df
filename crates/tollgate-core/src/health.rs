//! Passive health tracking per provider.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use tollgate_types::llm::ProbeReport;

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Last observed health of a provider, updated by active probes and by
/// the outcome of live traffic.
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
    last: Mutex<Option<(u64, DateTime<Utc>)>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            last: Mutex::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Record the result of an explicit health probe.
    pub fn record_probe(&self, report: &ProbeReport) {
        self.healthy.store(report.healthy, Ordering::Relaxed);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some((report.latency_ms, Utc::now()));
    }

    /// Fold a live call outcome into the health view.
    pub fn record_outcome(&self, ok: bool) {
        self.healthy.store(ok, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        HealthSnapshot {
            healthy: self.is_healthy(),
            latency_ms: last.map(|(ms, _)| ms),
            checked_at: last.map(|(_, at)| at),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
