//! Domain layer for rask-log-shipper.
//!
//! Contains the canonical types shared across all modules:
//! - `EventRecord`: a single application log event
//! - `Severity`: event severity (Trace/Debug/Info/Warn/Error/Fatal)
//! - `ShipperError`: the failure reported for an undeliverable batch

pub mod error;
pub mod event;

pub use error::{ServerErrorCode, ShipperError};
pub use event::{EventRecord, Severity};
