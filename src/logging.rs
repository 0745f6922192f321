//! tracing subscriber setup for applications embedding the shipper.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the host. [`setup_logging`] is a convenience for hosts that
//! have none.

use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoggingError {
    #[error("Invalid log directive '{0}'")]
    InvalidDirective(String),
    #[error("Failed to build filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("Global subscriber already installed")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Collects `target=level` directives and installs the global subscriber.
#[derive(Clone, Default)]
pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<String>>>,
    format: LogFormat,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        let Some((target, level)) = directive.trim().split_once('=') else {
            return Err(LoggingError::InvalidDirective(directive.to_string()));
        };
        let level = level.trim().to_ascii_lowercase();
        if target.trim().is_empty() || !LEVELS.contains(&level.as_str()) {
            return Err(LoggingError::InvalidDirective(directive.to_string()));
        }

        self.directives
            .write()
            .push(format!("{}={}", target.trim(), level));
        Ok(())
    }

    /// Quiets the HTTP stack underneath the transport.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["hyper", "hyper_util", "reqwest", "h2", "rustls"] {
            directives.push(format!("{target}=warn"));
        }
    }

    pub fn build_filter_string(&self, default_level: &str) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.to_string())
            .chain(directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }

    /// Installs the subscriber. `RUST_LOG`, when set, replaces the
    /// directives collected here.
    pub fn initialize_tracing(&self, default_level: &str) -> Result<(), LoggingError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                let filter = self.build_filter_string(default_level);
                EnvFilter::try_new(&filter).map_err(|e| LoggingError::InvalidFilter {
                    filter,
                    reason: e.to_string(),
                })?
            }
        };

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match self.format {
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .compact(),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_current_span(false))
                .try_init(),
        };

        installed.map_err(|_| LoggingError::AlreadyInitialized)
    }
}

static SETUP: OnceLock<Result<(), LoggingError>> = OnceLock::new();

/// Installs a compact subscriber at `level` with the HTTP stack quieted.
///
/// Only the first call does any work; later calls return its outcome.
pub fn setup_logging(level: &str) -> Result<(), LoggingError> {
    SETUP
        .get_or_init(|| {
            let system = LoggingSystem::new();
            system.add_default_directives();
            system.initialize_tracing(level)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string_starts_with_default_level() {
        let system = LoggingSystem::new();
        system.add_default_directives();
        system.add_directive("rask_log_shipper=DEBUG").unwrap();

        let filter = system.build_filter_string("info");
        assert!(filter.starts_with("info,hyper=warn"));
        assert!(filter.ends_with("rask_log_shipper=debug"));
        assert_eq!(system.directive_count(), 6);
    }

    #[test]
    fn test_invalid_directives_are_rejected() {
        let system = LoggingSystem::new();
        for directive in ["no_level", "=warn", "target=loud", ""] {
            assert!(matches!(
                system.add_directive(directive),
                Err(LoggingError::InvalidDirective(_))
            ));
        }
        assert_eq!(system.directive_count(), 0);
    }

    #[test]
    fn test_setup_logging_is_idempotent() {
        let first = setup_logging("warn");
        assert!(first.is_ok());
        assert_eq!(setup_logging("debug"), first);

        assert_eq!(
            LoggingSystem::new().initialize_tracing("warn"),
            Err(LoggingError::AlreadyInitialized)
        );
    }
}
