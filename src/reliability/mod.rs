//! Delivery policies layered around the transport: bounded resend of
//! transport failures and the process-wide error callback.

pub mod error_callback;
pub mod resend;

pub use error_callback::ErrorCallback;
pub use resend::{Backoff, ResendMiddleware};
