//! Run statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every job of one run
#[derive(Debug, Default)]
pub struct RunStats {
    archives_accepted: AtomicU64,
    archives_extracted: AtomicU64,
    artifacts_written: AtomicU64,
    bytes_written: AtomicU64,
    members_skipped: AtomicU64,
    tasks_failed: AtomicU64,
    probes_abandoned: AtomicU64,
    events_suppressed: AtomicU64,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub archives_accepted: u64,
    pub archives_extracted: u64,
    pub artifacts_written: u64,
    pub bytes_written: u64,
    pub members_skipped: u64,
    pub tasks_failed: u64,
    pub probes_abandoned: u64,
    pub events_suppressed: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.archives_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extracted(&self, artifacts: u64, bytes: u64, skipped: u64) {
        self.archives_extracted.fetch_add(1, Ordering::Relaxed);
        self.artifacts_written.fetch_add(artifacts, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.members_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned_probe(&self) {
        self.probes_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.events_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            archives_accepted: self.archives_accepted.load(Ordering::Relaxed),
            archives_extracted: self.archives_extracted.load(Ordering::Relaxed),
            artifacts_written: self.artifacts_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            members_skipped: self.members_skipped.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            probes_abandoned: self.probes_abandoned.load(Ordering::Relaxed),
            events_suppressed: self.events_suppressed.load(Ordering::Relaxed),
        }
    }
}
