use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for probe outcomes.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention. These are plain
/// counts for observability only; per-packet RTTs go to the sink.
#[derive(Debug, Default)]
pub struct ProbeStats {
    sent: AtomicU64,
    matched: AtomicU64,
    lost: AtomicU64,
    malformed: AtomicU64,
}

/// Counter values captured by one [`ProbeStats::snapshot`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub matched: u64,
    pub lost: u64,
    pub malformed: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.sent + self.matched + self.lost + self.malformed
    }
}

impl ProbeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_matched(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.swap(0, Ordering::Relaxed),
            matched: self.matched.swap(0, Ordering::Relaxed),
            lost: self.lost.swap(0, Ordering::Relaxed),
            malformed: self.malformed.swap(0, Ordering::Relaxed),
        }
    }
}
