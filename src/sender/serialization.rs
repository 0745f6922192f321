use crate::domain::EventRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Unknown serializer '{0}'")]
    UnknownSerializer(String),
}

/// Turns one event into its wire form. The payload of a batch is the
/// concatenation of these strings.
pub trait EventSerializer: Send + Sync {
    fn serialize(&self, event: &EventRecord) -> Result<String, SerializationError>;
}

/// Produces the `event` member of the JSON envelope.
pub trait EventBodySerializer: Send + Sync {
    fn serialize_body(&self, event: &EventRecord) -> Result<serde_json::Value, SerializationError>;
}

/// Per-deployment defaults stamped on every event envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMetadata {
    pub host: Option<String>,
    pub index: Option<String>,
    pub source: Option<String>,
    pub sourcetype: Option<String>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sourcetype: Option<&'a str>,
    event: serde_json::Value,
}

#[derive(Serialize)]
struct StructuredBody<'a> {
    severity: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logger: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<&'a str>,
}

/// Emits the full event as a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredBodySerializer;

impl EventBodySerializer for StructuredBodySerializer {
    fn serialize_body(&self, event: &EventRecord) -> Result<serde_json::Value, SerializationError> {
        let body = StructuredBody {
            severity: event.severity().as_str(),
            message: non_empty(Some(event.message())),
            logger: non_empty(event.logger_name()),
            thread: non_empty(event.thread_name()),
            exception: non_empty(event.exception_message()),
            properties: Some(event.properties()).filter(|p| !p.is_empty()),
            marker: non_empty(event.marker()),
        };
        Ok(serde_json::to_value(body)?)
    }
}

/// Emits only the message, as a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageBodySerializer;

impl EventBodySerializer for MessageBodySerializer {
    fn serialize_body(&self, event: &EventRecord) -> Result<serde_json::Value, SerializationError> {
        Ok(serde_json::Value::String(event.message().to_string()))
    }
}

/// Resolves a configured body serializer name.
pub fn body_serializer_by_name(name: &str) -> Result<Arc<dyn EventBodySerializer>, SerializationError> {
    match name.to_lowercase().as_str() {
        "" | "structured" | "json" => Ok(Arc::new(StructuredBodySerializer)),
        "message" | "string" => Ok(Arc::new(MessageBodySerializer)),
        _ => Err(SerializationError::UnknownSerializer(name.to_string())),
    }
}

/// Event-mode serializer: one JSON envelope per event, fields present only
/// when non-empty.
#[derive(Clone)]
pub struct JsonEventSerializer {
    metadata: EventMetadata,
    body: Arc<dyn EventBodySerializer>,
}

impl JsonEventSerializer {
    pub fn new(metadata: EventMetadata) -> Self {
        Self::with_body(metadata, Arc::new(StructuredBodySerializer))
    }

    pub fn with_body(metadata: EventMetadata, body: Arc<dyn EventBodySerializer>) -> Self {
        Self { metadata, body }
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, event: &EventRecord) -> Result<String, SerializationError> {
        let envelope = Envelope {
            time: event.formatted_time(),
            host: non_empty(self.metadata.host.as_deref()),
            index: non_empty(self.metadata.index.as_deref()),
            source: non_empty(self.metadata.source.as_deref()),
            sourcetype: non_empty(self.metadata.sourcetype.as_deref()),
            event: self.body.serialize_body(event)?,
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Raw-mode serializer: the message text, newline terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEventSerializer;

impl EventSerializer for RawEventSerializer {
    fn serialize(&self, event: &EventRecord) -> Result<String, SerializationError> {
        let mut line = String::with_capacity(event.message().len() + 1);
        line.push_str(event.message());
        line.push('\n');
        Ok(line)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use serde_json::{Value, json};

    fn metadata() -> EventMetadata {
        EventMetadata {
            host: Some("web-01".to_string()),
            index: Some("main".to_string()),
            source: None,
            sourcetype: Some(String::new()),
        }
    }

    #[test]
    fn test_envelope_omits_empty_fields() {
        let serializer = JsonEventSerializer::new(metadata());
        let event = EventRecord::new(Severity::Warn, "disk almost full")
            .with_logger("app.storage")
            .with_timestamp(1_700_000_000.25);

        let value: Value = serde_json::from_str(&serializer.serialize(&event).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "time": "1700000000.250",
                "host": "web-01",
                "index": "main",
                "event": {
                    "severity": "WARN",
                    "message": "disk almost full",
                    "logger": "app.storage"
                }
            })
        );
    }

    #[test]
    fn test_structured_body_includes_properties_and_exception() {
        let event = EventRecord::new(Severity::Error, "failed")
            .with_thread("main")
            .with_property("user", "42")
            .with_exception("IOError: broken pipe")
            .with_marker("SECURITY");

        let body = StructuredBodySerializer.serialize_body(&event).unwrap();
        assert_eq!(body["thread"], "main");
        assert_eq!(body["properties"]["user"], "42");
        assert_eq!(body["exception"], "IOError: broken pipe");
        assert_eq!(body["marker"], "SECURITY");
    }

    #[test]
    fn test_message_body_is_plain_string() {
        let serializer = JsonEventSerializer::with_body(
            EventMetadata::default(),
            body_serializer_by_name("message").unwrap(),
        );
        let event = EventRecord::info("hello").with_timestamp(1.0);
        assert_eq!(
            serializer.serialize(&event).unwrap(),
            r#"{"time":"1.000","event":"hello"}"#
        );
    }

    #[test]
    fn test_unknown_body_serializer_is_rejected() {
        assert!(matches!(
            body_serializer_by_name("xml"),
            Err(SerializationError::UnknownSerializer(_))
        ));
    }

    #[test]
    fn test_raw_serializer_appends_newline() {
        let line = RawEventSerializer
            .serialize(&EventRecord::info("plain text"))
            .unwrap();
        assert_eq!(line, "plain text\n");
    }
}
