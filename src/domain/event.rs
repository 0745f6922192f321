use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of an application log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log event handed over by an application adapter.
///
/// Immutable once built; the `with_*` methods consume and return the record so
/// adapters can assemble it in one expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    severity: Severity,
    message: String,
    logger_name: Option<String>,
    thread_name: Option<String>,
    properties: BTreeMap<String, String>,
    exception_message: Option<String>,
    marker: Option<String>,
    /// Seconds since the Unix epoch, with sub-second precision.
    timestamp: f64,
}

impl EventRecord {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            logger_name: None,
            thread_name: None,
            properties: BTreeMap::new(),
            exception_message: None,
            marker: None,
            timestamp: epoch_seconds(Utc::now()),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn with_logger(mut self, logger_name: impl Into<String>) -> Self {
        self.logger_name = Some(logger_name.into());
        self
    }

    pub fn with_thread(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = Some(thread_name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_exception(mut self, exception_message: impl Into<String>) -> Self {
        self.exception_message = Some(exception_message.into());
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn logger_name(&self) -> Option<&str> {
        self.logger_name.as_deref()
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn exception_message(&self) -> Option<&str> {
        self.exception_message.as_deref()
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Wire form of the timestamp: `<epoch-seconds>.<millis>`.
    pub fn formatted_time(&self) -> String {
        format!("{:.3}", self.timestamp)
    }
}

fn epoch_seconds(now: DateTime<Utc>) -> f64 {
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_time_has_millisecond_precision() {
        let event = EventRecord::info("hello").with_timestamp(1_700_000_000.5);
        assert_eq!(event.formatted_time(), "1700000000.500");
    }

    #[test]
    fn test_builder_sets_optional_fields() {
        let event = EventRecord::new(Severity::Error, "boom")
            .with_logger("app.db")
            .with_thread("worker-1")
            .with_property("tenant", "acme")
            .with_exception("timeout")
            .with_marker("AUDIT");

        assert_eq!(event.severity(), Severity::Error);
        assert_eq!(event.logger_name(), Some("app.db"));
        assert_eq!(event.thread_name(), Some("worker-1"));
        assert_eq!(event.properties().get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(event.exception_message(), Some("timeout"));
        assert_eq!(event.marker(), Some("AUDIT"));
        assert!(event.timestamp() > 0.0);
    }
}
