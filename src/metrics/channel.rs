use super::lifecycle::{LifecycleEvent, LifecycleObserver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMetricsSnapshot {
    pub post_attempts: u64,
    pub post_ok: u64,
    pub post_not_ok: u64,
    pub post_failed: u64,
    pub poll_attempts: u64,
    pub poll_ok: u64,
    pub poll_not_ok: u64,
    pub poll_failed: u64,
    pub acknowledged: u64,
    pub abandoned: u64,
    pub unacknowledged: usize,
    pub oldest_unacknowledged_age: Option<Duration>,
    pub most_recent_time_to_ack: Option<Duration>,
}

#[derive(Default)]
struct AckTiming {
    births: HashMap<u64, Instant>,
    oldest: Option<(u64, Instant)>,
    most_recent_time_to_ack: Option<Duration>,
}

impl AckTiming {
    fn born(&mut self, ack_id: u64, at: Instant) {
        self.births.insert(ack_id, at);
        if self.oldest.is_none_or(|(_, oldest)| at < oldest) {
            self.oldest = Some((ack_id, at));
        }
    }

    fn retire(&mut self, ack_id: u64) -> Option<Instant> {
        let birth = self.births.remove(&ack_id)?;
        // Only losing the current oldest forces a rescan
        if self.oldest.is_some_and(|(oldest_id, _)| oldest_id == ack_id) {
            self.oldest = self
                .births
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, at)| (*id, *at));
        }
        Some(birth)
    }
}

/// Passive observer of one channel's delivery lifecycle.
///
/// Tracks the birth time of every outstanding acknowledgement id so it can
/// report the outstanding count, the age of the oldest one and the most
/// recent time-to-acknowledge, alongside counters for every transition.
pub struct ChannelMetrics {
    timing: Mutex<AckTiming>,
    post_attempts: AtomicU64,
    post_ok: AtomicU64,
    post_not_ok: AtomicU64,
    post_failed: AtomicU64,
    poll_attempts: AtomicU64,
    poll_ok: AtomicU64,
    poll_not_ok: AtomicU64,
    poll_failed: AtomicU64,
    acknowledged: AtomicU64,
    abandoned: AtomicU64,
    warn_threshold: usize,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::with_warn_threshold(usize::MAX)
    }

    /// Logs a warning whenever the outstanding count grows past `threshold`.
    pub fn with_warn_threshold(threshold: usize) -> Self {
        Self {
            timing: Mutex::new(AckTiming::default()),
            post_attempts: AtomicU64::new(0),
            post_ok: AtomicU64::new(0),
            post_not_ok: AtomicU64::new(0),
            post_failed: AtomicU64::new(0),
            poll_attempts: AtomicU64::new(0),
            poll_ok: AtomicU64::new(0),
            poll_not_ok: AtomicU64::new(0),
            poll_failed: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            warn_threshold: threshold,
        }
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.timing.lock().births.len()
    }

    pub fn oldest_unacknowledged_birth(&self) -> Option<Instant> {
        self.timing.lock().oldest.map(|(_, at)| at)
    }

    pub fn oldest_unacknowledged_age(&self) -> Option<Duration> {
        self.oldest_unacknowledged_birth().map(|at| at.elapsed())
    }

    pub fn most_recent_time_to_ack(&self) -> Option<Duration> {
        self.timing.lock().most_recent_time_to_ack
    }

    pub fn post_attempts(&self) -> u64 {
        self.post_attempts.load(Ordering::Relaxed)
    }

    pub fn post_ok(&self) -> u64 {
        self.post_ok.load(Ordering::Relaxed)
    }

    pub fn post_not_ok(&self) -> u64 {
        self.post_not_ok.load(Ordering::Relaxed)
    }

    pub fn post_failed(&self) -> u64 {
        self.post_failed.load(Ordering::Relaxed)
    }

    pub fn poll_attempts(&self) -> u64 {
        self.poll_attempts.load(Ordering::Relaxed)
    }

    pub fn poll_ok(&self) -> u64 {
        self.poll_ok.load(Ordering::Relaxed)
    }

    pub fn poll_not_ok(&self) -> u64 {
        self.poll_not_ok.load(Ordering::Relaxed)
    }

    pub fn poll_failed(&self) -> u64 {
        self.poll_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ChannelMetricsSnapshot {
        let (unacknowledged, oldest, most_recent) = {
            let timing = self.timing.lock();
            (
                timing.births.len(),
                timing.oldest.map(|(_, at)| at.elapsed()),
                timing.most_recent_time_to_ack,
            )
        };

        ChannelMetricsSnapshot {
            post_attempts: self.post_attempts(),
            post_ok: self.post_ok(),
            post_not_ok: self.post_not_ok(),
            post_failed: self.post_failed(),
            poll_attempts: self.poll_attempts(),
            poll_ok: self.poll_ok(),
            poll_not_ok: self.poll_not_ok(),
            poll_failed: self.poll_failed(),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            unacknowledged,
            oldest_unacknowledged_age: oldest,
            most_recent_time_to_ack: most_recent,
        }
    }
}

impl Default for ChannelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleObserver for ChannelMetrics {
    fn observe(&self, event: &LifecycleEvent<'_>) {
        match event {
            LifecycleEvent::PreEventPost { .. } => {
                self.post_attempts.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::EventPostOk { .. } => {
                self.post_ok.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::EventPostNotOk { .. } => {
                self.post_not_ok.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::EventPostFailed { .. } => {
                self.post_failed.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::AckIdAssigned { ack_id, .. } => {
                let outstanding = {
                    let mut timing = self.timing.lock();
                    timing.born(*ack_id, Instant::now());
                    timing.births.len()
                };
                if outstanding > self.warn_threshold {
                    warn!(
                        outstanding,
                        threshold = self.warn_threshold,
                        "Acknowledgement window is growing"
                    );
                }
            }
            LifecycleEvent::PreAckPoll { .. } => {
                self.poll_attempts.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::AckPollOk { .. } => {
                self.poll_ok.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::AckPollNotOk { .. } => {
                self.poll_not_ok.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::AckPollFailed { .. } => {
                self.poll_failed.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::Acknowledged { ack_id, .. } => {
                let mut timing = self.timing.lock();
                if let Some(birth) = timing.retire(*ack_id) {
                    timing.most_recent_time_to_ack = Some(birth.elapsed());
                    self.acknowledged.fetch_add(1, Ordering::Relaxed);
                }
            }
            LifecycleEvent::AckAbandoned { ack_id, .. } => {
                if self.timing.lock().retire(*ack_id).is_some() {
                    self.abandoned.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}
