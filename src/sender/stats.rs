// Lock-free delivery counters shared by the sync and async senders.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default)]
pub struct SenderStats {
    events_accepted: AtomicU64,
    events_rejected: AtomicU64,
    batches_flushed: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    bytes_flushed: AtomicU64,
    last_flush_time: AtomicU64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, bytes: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes as u64, Ordering::Relaxed);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_flush_time.store(now, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            last_flush_time: self.last_flush_time.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SenderStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderStatsSnapshot {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub batches_flushed: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub bytes_flushed: u64,
    /// Unix seconds of the latest flush, 0 before the first one
    pub last_flush_time: u64,
}

impl SenderStatsSnapshot {
    /// Batches handed to the chain whose outcome is not known yet.
    pub fn in_flight(&self) -> u64 {
        self.batches_flushed
            .saturating_sub(self.batches_delivered + self.batches_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_in_flight() {
        let stats = SenderStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_flush(120);
        stats.record_flush(80);
        stats.record_delivered();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_accepted, 2);
        assert_eq!(snapshot.batches_flushed, 2);
        assert_eq!(snapshot.bytes_flushed, 200);
        assert_eq!(snapshot.in_flight(), 1);
        assert!(snapshot.last_flush_time > 0);
    }
}
