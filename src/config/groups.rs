use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Events per batch; 0 means unbounded.
    pub max_count: usize,
    /// Serialized bytes per batch; 0 means unbounded.
    pub max_bytes: usize,
    /// Heartbeat flush interval; 0 disables the timer.
    pub flush_interval_ms: u64,
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_count: 10,
            max_bytes: 10 * 1024,
            flush_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Resends after the first attempt; 0 disables the resend middleware.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub ack_path: String,
    /// Unacknowledged count above which a warning is logged.
    pub window_warn_threshold: usize,
}

impl AckConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_ms: 1_000,
            ack_path: "/services/collector/ack".to_string(),
            window_warn_threshold: 1_000,
        }
    }
}

/// Defaults stamped on every event envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Falls back to the machine hostname when unset.
    pub host: Option<String>,
    pub index: Option<String>,
    pub source: Option<String>,
    pub sourcetype: Option<String>,
}
