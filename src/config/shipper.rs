use super::groups::{AckConfig, BatchConfig, MetadataConfig, RetryConfig};
use super::serde_helpers::{
    load_env_string, load_env_string_opt, load_env_var, non_empty, parse_bool_property,
    parse_property,
};
use super::{ConfigError, ContentMode, SendMode};
use crate::sender::EventMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    /// Collector base URL, e.g. `https://collector.example.com:8088`
    pub endpoint: String,
    pub token: String,
    /// Scheme placed before the token in the `Authorization` header
    pub auth_scheme: String,
    /// Client-chosen channel id; generated when raw mode or acks need one
    pub channel: Option<String>,
    pub content_mode: ContentMode,
    pub send_mode: SendMode,
    pub event_path: String,
    pub raw_path: String,
    pub health_path: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_connections: usize,
    pub user_agent: String,
    /// Gzip request bodies
    pub enable_compression: bool,
    pub disable_certificate_validation: bool,
    /// `structured` (JSON object) or `message` (plain string)
    pub body_serializer: String,
    /// Envelope serializer; only `json` is built in
    pub header_serializer: String,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub ack: AckConfig,
    pub metadata: MetadataConfig,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8088".to_string(),
            token: String::new(),
            auth_scheme: "Bearer".to_string(),
            channel: None,
            content_mode: ContentMode::Event,
            send_mode: SendMode::Sequential,
            event_path: "/services/collector/event".to_string(),
            raw_path: "/services/collector/raw".to_string(),
            health_path: "/services/collector/health".to_string(),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_connections: 20,
            user_agent: format!("rask-log-shipper/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: false,
            disable_certificate_validation: false,
            body_serializer: "structured".to_string(),
            header_serializer: "json".to_string(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            ack: AckConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl ShipperConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: ShipperConfig = toml::from_str(content)?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        // A whole TOML document in SHIPPER_CONFIG wins over individual variables
        if let Ok(document) = std::env::var("SHIPPER_CONFIG") {
            return Self::from_toml(&document);
        }

        let mut config = ShipperConfig::default();

        load_env_string("SHIPPER_ENDPOINT", &mut config.endpoint);
        load_env_string("SHIPPER_TOKEN", &mut config.token);
        load_env_string("SHIPPER_AUTH_SCHEME", &mut config.auth_scheme);
        load_env_string_opt("SHIPPER_CHANNEL", &mut config.channel);
        load_env_var("SHIPPER_CONTENT_MODE", &mut config.content_mode)?;
        load_env_var("SHIPPER_SEND_MODE", &mut config.send_mode)?;
        load_env_var("SHIPPER_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms)?;
        load_env_var("SHIPPER_ENABLE_COMPRESSION", &mut config.enable_compression)?;
        load_env_var("SHIPPER_BATCH_COUNT", &mut config.batch.max_count)?;
        load_env_var("SHIPPER_BATCH_BYTES", &mut config.batch.max_bytes)?;
        load_env_var("SHIPPER_FLUSH_INTERVAL_MS", &mut config.batch.flush_interval_ms)?;
        load_env_var("SHIPPER_RETRIES", &mut config.retry.max_retries)?;
        load_env_var("SHIPPER_ACK_ENABLED", &mut config.ack.enabled)?;
        load_env_var("SHIPPER_ACK_POLL_INTERVAL_MS", &mut config.ack.poll_interval_ms)?;
        load_env_string_opt("SHIPPER_HOST", &mut config.metadata.host);
        load_env_string_opt("SHIPPER_INDEX", &mut config.metadata.index);
        load_env_string_opt("SHIPPER_SOURCE", &mut config.metadata.source);
        load_env_string_opt("SHIPPER_SOURCETYPE", &mut config.metadata.sourcetype);

        config.post_process();
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from the plain key/value settings logging adapters
    /// read from their own configuration files. Unknown keys are ignored with
    /// a warning.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = ShipperConfig::default();

        for (key, value) in properties {
            match key.as_str() {
                "url" | "endpoint" => config.endpoint = value.trim().to_string(),
                "token" => config.token = value.trim().to_string(),
                "auth_scheme" => config.auth_scheme = value.trim().to_string(),
                "channel" => config.channel = non_empty(value),
                "type" | "content_mode" => config.content_mode = parse_property(key, value)?,
                "send_mode" => config.send_mode = parse_property(key, value)?,
                "batch_size_count" => config.batch.max_count = parse_property(key, value)?,
                "batch_size_bytes" => config.batch.max_bytes = parse_property(key, value)?,
                "batch_interval" => config.batch.flush_interval_ms = parse_property(key, value)?,
                "retries_on_error" => config.retry.max_retries = parse_property(key, value)?,
                "host" => config.metadata.host = non_empty(value),
                "index" => config.metadata.index = non_empty(value),
                "source" => config.metadata.source = non_empty(value),
                "sourcetype" => config.metadata.sourcetype = non_empty(value),
                "ack" => config.ack.enabled = parse_bool_property(key, value)?,
                "ack_interval" => config.ack.poll_interval_ms = parse_property(key, value)?,
                "timeout" => config.request_timeout_ms = parse_property(key, value)?,
                "compression" => config.enable_compression = parse_bool_property(key, value)?,
                "disable_certificate_validation" => {
                    config.disable_certificate_validation = parse_bool_property(key, value)?;
                }
                "event_body_serializer" | "body_serializer" => {
                    config.body_serializer = value.trim().to_string();
                }
                "event_header_serializer" | "header_serializer" => {
                    config.header_serializer = value.trim().to_string();
                }
                other => warn!(key = other, "Ignoring unknown shipper setting"),
            }
        }

        config.post_process();
        config.validate()?;
        Ok(config)
    }

    /// Fills in derived values: a channel id when raw mode or acks need one,
    /// and the host metadata default.
    pub fn post_process(&mut self) {
        if self.channel.is_none() && self.requires_channel() {
            self.channel = Some(Uuid::new_v4().to_string());
        }

        if self.metadata.host.is_none()
            && let Ok(hostname) = hostname::get()
            && let Some(hostname) = hostname.to_str()
        {
            self.metadata.host = Some(hostname.to_string());
        }
    }

    pub fn requires_channel(&self) -> bool {
        self.content_mode == ContentMode::Raw || self.ack.enabled
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn event_metadata(&self) -> EventMetadata {
        EventMetadata {
            host: self.metadata.host.clone(),
            index: self.metadata.index.clone(),
            source: self.metadata.source.clone(),
            sourcetype: self.metadata.sourcetype.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_properties_map_onto_groups() {
        let config = ShipperConfig::from_properties(&properties(&[
            ("url", "https://collector.example.com:8088"),
            ("token", "abc-123"),
            ("batch_size_count", "3"),
            ("batch_size_bytes", "0"),
            ("batch_interval", "250"),
            ("send_mode", "parallel"),
            ("retries_on_error", "5"),
            ("index", "main"),
            ("sourcetype", "_json"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "https://collector.example.com:8088");
        assert_eq!(config.batch.max_count, 3);
        assert_eq!(config.batch.max_bytes, 0);
        assert_eq!(config.batch.flush_interval(), Some(Duration::from_millis(250)));
        assert_eq!(config.send_mode, SendMode::Parallel);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.metadata.index.as_deref(), Some("main"));
        assert_eq!(config.metadata.sourcetype.as_deref(), Some("_json"));
        assert!(config.channel.is_none());
    }

    #[test]
    fn test_ack_mode_generates_channel() {
        let config = ShipperConfig::from_properties(&properties(&[
            ("token", "abc-123"),
            ("ack", "true"),
        ]))
        .unwrap();

        let channel = config.channel.expect("channel should be generated");
        assert!(Uuid::parse_str(&channel).is_ok());
    }

    #[test]
    fn test_explicit_channel_is_kept() {
        let config = ShipperConfig::from_properties(&properties(&[
            ("token", "abc-123"),
            ("type", "raw"),
            ("channel", "11111111-2222-3333-4444-555555555555"),
        ]))
        .unwrap();

        assert_eq!(config.content_mode, ContentMode::Raw);
        assert_eq!(
            config.channel.as_deref(),
            Some("11111111-2222-3333-4444-555555555555")
        );
    }

    #[test]
    fn test_invalid_property_names_the_key() {
        let error = ShipperConfig::from_properties(&properties(&[
            ("token", "abc-123"),
            ("send_mode", "sideways"),
        ]))
        .unwrap_err();

        match error {
            ConfigError::InvalidProperty { key, .. } => assert_eq!(key, "send_mode"),
            other => panic!("Expected InvalidProperty, got {other:?}"),
        }
    }

    #[test]
    fn test_toml_document_with_groups() {
        let config = ShipperConfig::from_toml(
            r#"
            endpoint = "http://127.0.0.1:8088"
            token = "abc-123"
            send_mode = "parallel"

            [batch]
            max_count = 50
            flush_interval_ms = 0

            [ack]
            enabled = true
            poll_interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.batch.max_count, 50);
        assert_eq!(config.batch.max_bytes, 10 * 1024);
        assert_eq!(config.batch.flush_interval(), None);
        assert!(config.ack.enabled);
        assert_eq!(config.ack.poll_interval(), Duration::from_millis(500));
        assert!(config.channel.is_some());
    }
}
