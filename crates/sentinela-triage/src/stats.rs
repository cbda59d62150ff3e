// Motor statistics
//
// An injected stats object updated atomically, exposed through an explicit
// snapshot accessor; consumed by the /status endpoint.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Live counters for the triage motor
#[derive(Debug, Default)]
pub struct TriageStats {
    running: AtomicBool,
    total_processed: AtomicU64,
    total_eligible: AtomicU64,
    total_ineligible: AtomicU64,
    errors: AtomicU64,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl TriageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the motor running; returns false when it already was
    pub fn mark_started(&self) -> bool {
        let was_running = self.running.swap(true, Ordering::SeqCst);
        if !was_running {
            *self.started_at.write() = Some(Utc::now());
        }
        !was_running
    }

    /// Mark the motor stopped; returns false when it already was
    pub fn mark_stopped(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn incr_processed(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_eligible(&self) {
        self.total_eligible.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_ineligible(&self) {
        self.total_ineligible.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TriageStatsSnapshot {
        TriageStatsSnapshot {
            running: self.is_running(),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_eligible: self.total_eligible.load(Ordering::Relaxed),
            total_ineligible: self.total_ineligible.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            started_at: *self.started_at.read(),
        }
    }
}

/// Point-in-time view of the motor counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageStatsSnapshot {
    pub running: bool,
    pub total_processed: u64,
    pub total_eligible: u64,
    pub total_ineligible: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
}
