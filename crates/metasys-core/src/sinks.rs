//! Observation and metrics sink implementations

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::Observation;
use crate::traits::{MetricsSink, ObservationSink};

/// Observation sink that hands observations to a channel
///
/// The receiving side (a publisher task) owns delivery; `publish` never
/// blocks. If the receiver is gone the observation is dropped with a warning.
#[derive(Debug, Clone)]
pub struct ChannelObservationSink {
    tx: mpsc::UnboundedSender<Observation>,
}

impl ChannelObservationSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Observation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ObservationSink for ChannelObservationSink {
    fn publish(&self, observation: Observation) {
        if let Err(e) = self.tx.send(observation) {
            warn!(sensor_id = %e.0.sensor_id, "Observation receiver closed, dropping value");
        }
    }
}

/// Metrics sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Metrics sink that emits each sample as a debug log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        debug!(metric = name, value, tags = ?tags, "metric");
    }
}

/// Metrics sink that sums values per metric name, for tests and health reports
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    values: Mutex<BTreeMap<String, f64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all values recorded under `name`
    pub fn total(&self, name: &str) -> f64 {
        self.values.lock().get(name).copied().unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.values.lock().clone()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, name: &str, value: f64, _tags: &[(&str, &str)]) {
        *self.values.lock().entry(name.to_string()).or_insert(0.0) += value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MappedSensor, ObservationOrigin, PresentValue};

    #[tokio::test]
    async fn test_channel_sink_hands_off() {
        let (sink, mut rx) = ChannelObservationSink::new();
        let sensor = MappedSensor::new("s1", "obj-1");
        sink.publish(Observation::for_sensor(
            &sensor,
            PresentValue::Text("on".into()),
            ObservationOrigin::Stream,
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sensor_id, "s1");
        assert_eq!(received.value.as_str(), Some("on"));
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelObservationSink::new();
        drop(rx);
        let sensor = MappedSensor::new("s1", "obj-1");
        sink.publish(Observation::for_sensor(
            &sensor,
            PresentValue::Missing,
            ObservationOrigin::Trend,
        ));
    }

    #[test]
    fn test_in_memory_metrics_totals() {
        let metrics = InMemoryMetrics::new();
        metrics.increment("a", &[]);
        metrics.increment("a", &[("sensor", "x")]);
        metrics.record("b", 2.5, &[]);
        assert_eq!(metrics.total("a"), 2.0);
        assert_eq!(metrics.total("b"), 2.5);
        assert_eq!(metrics.total("c"), 0.0);
    }
}
