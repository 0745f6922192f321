//! Observation of the delivery and acknowledgement lifecycle.
//!
//! Components push typed [`LifecycleEvent`]s onto a [`LifecycleObserver`];
//! [`ChannelMetrics`] is the observer that turns them into counters and
//! latency figures. Nothing here makes control-flow decisions.

pub mod channel;
pub mod lifecycle;
#[cfg(feature = "metrics")]
pub mod prometheus;

pub use channel::{ChannelMetrics, ChannelMetricsSnapshot};
pub use lifecycle::{LifecycleEvent, LifecycleObserver, NoopObserver};
#[cfg(feature = "metrics")]
pub use prometheus::{MetricsError, PrometheusExporter};
