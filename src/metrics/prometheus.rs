use super::channel::{ChannelMetrics, ChannelMetricsSnapshot};
use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("Metrics encoding error: {0}")]
    EncodingError(#[from] std::string::FromUtf8Error),
}

/// Renders a channel's [`ChannelMetrics`] in the Prometheus text format.
///
/// Values are copied from a fresh snapshot on every export, so the gauges
/// always mirror the observer's counters.
pub struct PrometheusExporter {
    metrics: Arc<ChannelMetrics>,
    registry: Registry,
    event_posts: IntGaugeVec,
    ack_polls: IntGaugeVec,
    ack_outcomes: IntGaugeVec,
    unacknowledged: IntGauge,
    oldest_unacknowledged_age: Gauge,
    most_recent_time_to_ack: Gauge,
}

impl PrometheusExporter {
    pub fn new(metrics: Arc<ChannelMetrics>) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let event_posts = IntGaugeVec::new(
            Opts::new("shipper_event_posts", "Event batch POSTs by outcome"),
            &["outcome"], // attempted, ok, not_ok, failed
        )?;
        registry.register(Box::new(event_posts.clone()))?;

        let ack_polls = IntGaugeVec::new(
            Opts::new("shipper_ack_polls", "Acknowledgement polls by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ack_polls.clone()))?;

        let ack_outcomes = IntGaugeVec::new(
            Opts::new(
                "shipper_acknowledgements",
                "Tracked batches that left the acknowledgement window",
            ),
            &["outcome"], // acknowledged, abandoned
        )?;
        registry.register(Box::new(ack_outcomes.clone()))?;

        let unacknowledged = IntGauge::new(
            "shipper_unacknowledged_batches",
            "Batches awaiting acknowledgement",
        )?;
        registry.register(Box::new(unacknowledged.clone()))?;

        let oldest_unacknowledged_age = Gauge::new(
            "shipper_oldest_unacknowledged_age_seconds",
            "Age of the oldest batch awaiting acknowledgement",
        )?;
        registry.register(Box::new(oldest_unacknowledged_age.clone()))?;

        let most_recent_time_to_ack = Gauge::new(
            "shipper_most_recent_time_to_ack_seconds",
            "Time between ack id assignment and confirmation for the latest acknowledged batch",
        )?;
        registry.register(Box::new(most_recent_time_to_ack.clone()))?;

        Ok(Self {
            metrics,
            registry,
            event_posts,
            ack_polls,
            ack_outcomes,
            unacknowledged,
            oldest_unacknowledged_age,
            most_recent_time_to_ack,
        })
    }

    fn refresh(&self, snapshot: &ChannelMetricsSnapshot) {
        let as_gauge = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);

        for (outcome, value) in [
            ("attempted", snapshot.post_attempts),
            ("ok", snapshot.post_ok),
            ("not_ok", snapshot.post_not_ok),
            ("failed", snapshot.post_failed),
        ] {
            self.event_posts
                .with_label_values(&[outcome])
                .set(as_gauge(value));
        }

        for (outcome, value) in [
            ("attempted", snapshot.poll_attempts),
            ("ok", snapshot.poll_ok),
            ("not_ok", snapshot.poll_not_ok),
            ("failed", snapshot.poll_failed),
        ] {
            self.ack_polls
                .with_label_values(&[outcome])
                .set(as_gauge(value));
        }

        self.ack_outcomes
            .with_label_values(&["acknowledged"])
            .set(as_gauge(snapshot.acknowledged));
        self.ack_outcomes
            .with_label_values(&["abandoned"])
            .set(as_gauge(snapshot.abandoned));

        self.unacknowledged
            .set(as_gauge(snapshot.unacknowledged as u64));
        self.oldest_unacknowledged_age.set(
            snapshot
                .oldest_unacknowledged_age
                .map_or(0.0, |age| age.as_secs_f64()),
        );
        self.most_recent_time_to_ack.set(
            snapshot
                .most_recent_time_to_ack
                .map_or(0.0, |latency| latency.as_secs_f64()),
        );
    }

    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        self.refresh(&self.metrics.snapshot());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BatchLimits, EventBatch};
    use crate::metrics::{LifecycleEvent, LifecycleObserver};

    #[test]
    fn test_export_reflects_channel_metrics() {
        let metrics = Arc::new(ChannelMetrics::new());
        let exporter = PrometheusExporter::new(Arc::clone(&metrics)).unwrap();
        let batch = EventBatch::new(BatchLimits::default());

        metrics.observe(&LifecycleEvent::PreEventPost { batch: &batch });
        metrics.observe(&LifecycleEvent::AckIdAssigned {
            batch: &batch,
            ack_id: 3,
        });

        let output = exporter.export_metrics().unwrap();
        assert!(output.contains(r#"shipper_event_posts{outcome="attempted"} 1"#));
        assert!(output.contains("shipper_unacknowledged_batches 1"));

        metrics.observe(&LifecycleEvent::Acknowledged {
            batch: &batch,
            ack_id: 3,
        });

        let output = exporter.export_metrics().unwrap();
        assert!(output.contains("shipper_unacknowledged_batches 0"));
        assert!(output.contains(r#"shipper_acknowledgements{outcome="acknowledged"} 1"#));
    }
}
