//! Process-wide sink for delivery failures.
//!
//! At most one callback is installed at a time; registering replaces the
//! previous one. Without a callback, failures are logged at `error` level.

use crate::buffer::EventBatch;
use crate::domain::ShipperError;
use parking_lot::RwLock;
use std::sync::{Arc, LazyLock};
use tracing::error;

pub trait ErrorCallback: Send + Sync {
    fn on_error(&self, batch: &EventBatch, error: &ShipperError);
}

impl<F> ErrorCallback for F
where
    F: Fn(&EventBatch, &ShipperError) + Send + Sync,
{
    fn on_error(&self, batch: &EventBatch, error: &ShipperError) {
        self(batch, error)
    }
}

static CALLBACK: LazyLock<RwLock<Option<Arc<dyn ErrorCallback>>>> =
    LazyLock::new(|| RwLock::new(None));

pub fn register<C>(callback: C)
where
    C: ErrorCallback + 'static,
{
    register_shared(Arc::new(callback));
}

pub fn register_shared(callback: Arc<dyn ErrorCallback>) {
    *CALLBACK.write() = Some(callback);
}

pub fn clear() {
    *CALLBACK.write() = None;
}

pub fn is_registered() -> bool {
    CALLBACK.read().is_some()
}

/// Delivers a failure to the installed callback.
pub fn report(batch: &EventBatch, failure: &ShipperError) {
    // Cloned out so a callback may re-register without deadlocking
    let callback = CALLBACK.read().clone();

    match callback {
        Some(callback) => callback.on_error(batch, failure),
        None => error!(
            batch_id = %batch.id(),
            events = batch.len(),
            error = %failure,
            "Batch delivery failed"
        ),
    }
}
