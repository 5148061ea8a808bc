//! Probe counters shared by the scheduler and the workers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for the probe pipeline.
#[derive(Debug, Default)]
pub struct ProbeCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    /// Requests accepted onto a worker queue
    pub submitted: u64,
    /// Requests discarded because the worker queue was full or closed
    pub dropped: u64,
    /// Completed probes that reached their target
    pub succeeded: u64,
    /// Completed probes that did not
    pub failed: u64,
}

impl ProbeStats {
    /// Requests accepted but not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.succeeded + self.failed)
    }
}

impl ProbeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProbeStats {
        ProbeStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
