use super::{ConfigError, ShipperConfig};
use crate::sender::body_serializer_by_name;
use url::Url;

impl ShipperConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate endpoint URL
        let url = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint URL '{}' must use http or https",
                self.endpoint
            )));
        }

        if self.token.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Token must not be empty".to_string(),
            ));
        }

        // Raw mode and acknowledgements are both scoped to a channel
        if self.requires_channel() && self.channel.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidConfig(
                "A channel id is required for raw content mode or acknowledgements".to_string(),
            ));
        }

        // Validate timeouts
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request and connect timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        // Validate retry config
        if self.retry.max_retries > 0 {
            if self.retry.initial_delay_ms == 0 {
                return Err(ConfigError::InvalidConfig(
                    "Retry initial delay must be greater than 0".to_string(),
                ));
            }
            if self.retry.initial_delay_ms > self.retry.max_delay_ms {
                return Err(ConfigError::InvalidConfig(format!(
                    "Retry initial delay ({}ms) exceeds max delay ({}ms)",
                    self.retry.initial_delay_ms, self.retry.max_delay_ms
                )));
            }
        }

        if self.ack.enabled && self.ack.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Ack poll interval must be greater than 0".to_string(),
            ));
        }

        body_serializer_by_name(&self.body_serializer)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if !self.header_serializer.eq_ignore_ascii_case("json") {
            return Err(ConfigError::InvalidConfig(format!(
                "Unknown header serializer '{}'",
                self.header_serializer
            )));
        }

        Ok(())
    }
}
