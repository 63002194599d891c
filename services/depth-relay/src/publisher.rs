//! Metric fan-out to subscribers
//!
//! Consumes metrics emitted by the feed task, remembers the latest one, and
//! pushes it to every registered subscriber. Subscribers may also poll at
//! any time and get the latest value back immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::RelayMetrics;
use crate::websocket::{DeliveryError, SubscriberHandle, SubscriberId, SubscriberRegistry};

/// Shortest decimal string that parses back to the same `f64`.
///
/// Never uses exponent notation: `0.0 → "0"`, `20.0 → "20"`.
pub fn format_metric(value: f64) -> String {
    format!("{}", value)
}

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    /// Subscribers removed because delivery failed.
    pub removed: Vec<SubscriberId>,
}

/// Broadcasts metrics and answers subscriber polls.
pub struct MetricPublisher {
    registry: Arc<SubscriberRegistry>,
    /// Last published value, stored as `f64` bits.
    last_value: AtomicU64,
    metrics: Arc<RelayMetrics>,
}

impl MetricPublisher {
    pub fn new(registry: Arc<SubscriberRegistry>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            registry,
            last_value: AtomicU64::new(0.0f64.to_bits()),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Most recently published value, `0.0` before the first publish.
    pub fn last_value(&self) -> f64 {
        f64::from_bits(self.last_value.load(Ordering::Acquire))
    }

    /// Record `value` as the latest metric and broadcast it.
    pub fn publish(&self, value: f64) -> BroadcastOutcome {
        self.last_value.store(value.to_bits(), Ordering::Release);
        self.broadcast(value)
    }

    /// Send `value` to every subscriber in a registry snapshot.
    ///
    /// A failing subscriber is removed; delivery to the rest continues.
    pub fn broadcast(&self, value: f64) -> BroadcastOutcome {
        let payload = format_metric(value);
        let mut outcome = BroadcastOutcome::default();

        for handle in self.registry.snapshot() {
            match handle.deliver(&payload) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(subscriber = %handle.id(), error = %e, "Broadcast failed, removing subscriber");
                    self.remove(handle.id());
                    outcome.removed.push(handle.id());
                }
            }
        }

        self.metrics.record_publish(outcome.delivered as u64);
        debug!(
            value = %payload,
            delivered = outcome.delivered,
            removed = outcome.removed.len(),
            "Broadcast metric"
        );
        outcome
    }

    /// Reply to a subscriber poll with the last published value.
    ///
    /// On failure the subscriber is removed and the error returned so the
    /// connection task can stop.
    pub fn handle_poll(&self, handle: &SubscriberHandle) -> Result<(), DeliveryError> {
        let payload = format_metric(self.last_value());
        match handle.deliver(&payload) {
            Ok(()) => {
                self.metrics.record_poll();
                Ok(())
            }
            Err(e) => {
                warn!(subscriber = %handle.id(), error = %e, "Poll reply failed, removing subscriber");
                self.remove(handle.id());
                Err(e)
            }
        }
    }

    /// Remove a subscriber and update the connected gauge.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            self.metrics.record_subscriber_removed();
        }
        self.metrics
            .set_connected_subscribers(self.registry.len() as u64);
        removed
    }

    /// Publish every metric received until the channel closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<f64>) {
        info!("Metric publisher started");
        while let Some(value) = rx.recv().await {
            self.publish(value);
        }
        info!("Metric channel closed, publisher stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::{DropPolicy, OutboundQueue};
    use crate::websocket::SubscriberSink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<String>>,
    }

    impl SubscriberSink for RecordingSink {
        fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
            self.received.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    impl SubscriberSink for FailingSink {
        fn deliver(&self, _payload: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Write("broken pipe".to_string()))
        }
    }

    fn publisher() -> MetricPublisher {
        MetricPublisher::new(
            Arc::new(SubscriberRegistry::new()),
            Arc::new(RelayMetrics::new()),
        )
    }

    #[test]
    fn test_format_metric() {
        assert_eq!(format_metric(0.0), "0");
        assert_eq!(format_metric(20.0), "20");
        assert_eq!(format_metric(1.5), "1.5");
        assert_eq!(format_metric(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_metric(1e21), "1000000000000000000000");
    }

    #[test]
    fn test_broadcast_skips_and_removes_failing_subscriber() {
        let publisher = publisher();
        let registry = publisher.registry().clone();

        let sinks: Vec<Arc<RecordingSink>> = (0..4).map(|_| Arc::new(RecordingSink::default())).collect();
        let mut handles = Vec::new();
        for (i, sink) in sinks.iter().enumerate() {
            handles.push(registry.register(sink.clone()));
            if i == 1 {
                handles.push(registry.register(Arc::new(FailingSink)));
            }
        }
        let failing = handles[2].id();

        let outcome = publisher.broadcast(42.25);

        assert_eq!(outcome.delivered, 4);
        assert_eq!(outcome.removed, vec![failing]);
        assert!(!registry.contains(failing));
        assert_eq!(registry.len(), 4);
        for sink in &sinks {
            assert_eq!(*sink.received.lock().unwrap(), vec!["42.25".to_string()]);
        }
    }

    #[test]
    fn test_publish_updates_last_value() {
        let publisher = publisher();
        assert_eq!(publisher.last_value(), 0.0);

        publisher.publish(101.75);
        assert_eq!(publisher.last_value(), 101.75);
    }

    #[test]
    fn test_poll_before_publish_returns_zero() {
        let publisher = publisher();
        let sink = Arc::new(RecordingSink::default());
        let handle = publisher.registry().register(sink.clone());

        publisher.handle_poll(&handle).unwrap();
        assert_eq!(*sink.received.lock().unwrap(), vec!["0".to_string()]);
    }

    #[test]
    fn test_poll_returns_latest_value() {
        let publisher = publisher();
        let sink = Arc::new(RecordingSink::default());
        let handle = publisher.registry().register(sink.clone());

        publisher.publish(3.5);
        publisher.handle_poll(&handle).unwrap();

        assert_eq!(
            *sink.received.lock().unwrap(),
            vec!["3.5".to_string(), "3.5".to_string()]
        );
    }

    #[test]
    fn test_failed_poll_removes_subscriber() {
        let publisher = publisher();
        let handle = publisher.registry().register(Arc::new(FailingSink));

        assert!(publisher.handle_poll(&handle).is_err());
        assert!(publisher.registry().is_empty());
    }

    #[test]
    fn test_closed_queue_removed_on_broadcast() {
        let publisher = publisher();
        let queue = Arc::new(OutboundQueue::new(4, DropPolicy::DropOldest));
        publisher.registry().register(queue.clone());
        queue.close();

        let outcome = publisher.broadcast(1.0);
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.removed.len(), 1);
        assert!(publisher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_publishes_until_channel_closes() {
        let publisher = Arc::new(publisher());
        let queue = Arc::new(OutboundQueue::new(8, DropPolicy::DropOldest));
        publisher.registry().register(queue.clone());

        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(publisher.clone().run(rx));

        tx.send(10.0).await.unwrap();
        tx.send(12.5).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(queue.next().await.as_deref(), Some("10"));
        assert_eq!(queue.next().await.as_deref(), Some("12.5"));
        assert_eq!(publisher.last_value(), 12.5);
    }
}
