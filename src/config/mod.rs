mod groups;
pub mod serde_helpers;
mod shipper;
mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
    #[error("Invalid value for '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },
}

/// Whether requests may overlap on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// At most one request in flight; batches are indexed in submission order.
    #[default]
    Sequential,
    /// Each batch is posted independently and may complete out of order.
    Parallel,
}

impl FromStr for SendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(SendMode::Sequential),
            "parallel" => Ok(SendMode::Parallel),
            other => Err(format!(
                "unknown send mode '{other}'. Valid values: sequential, parallel"
            )),
        }
    }
}

impl fmt::Display for SendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendMode::Sequential => f.write_str("sequential"),
            SendMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Shape of the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// One JSON envelope per event (default)
    #[default]
    Event,
    /// Newline separated messages; requires a channel
    Raw,
}

impl FromStr for ContentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "event" => Ok(ContentMode::Event),
            "raw" => Ok(ContentMode::Raw),
            other => Err(format!(
                "unknown content mode '{other}'. Valid values: event, raw"
            )),
        }
    }
}

pub use groups::{AckConfig, BatchConfig, MetadataConfig, RetryConfig};
pub use shipper::ShipperConfig;
