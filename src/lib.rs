#![deny(warnings, rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_possible_truncation, // Durations and sizes stay within realistic bounds
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. AckError in ack module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

//! Client-side log shipping engine.
//!
//! Events are accumulated into batches, flushed by count, byte size or elapsed
//! time, and posted through a middleware chain (resend, acknowledgement
//! tracking) to an HTTP event collector. When acknowledgements are enabled a
//! background scheduler polls the collector until every batch is confirmed as
//! indexed.

pub mod ack;
pub mod buffer;
pub mod config;
pub mod domain;
pub mod logging;
pub mod metrics;
pub mod reliability;
pub mod sender;

// Re-export main types for easy access
pub use config::{ConfigError, ShipperConfig};
pub use domain::{EventRecord, Severity, ShipperError};
pub use sender::{AsyncSender, SenderBuilder, SyncSender};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
