//! Observability counters for the relay
//!
//! Tracks ingestion outcomes, publishing, and subscriber churn so the
//! gateway can expose them on its health endpoint.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Core counters for the relay.
#[derive(Debug)]
pub struct RelayMetrics {
    // Ingestion
    pub frames_received: AtomicU64,
    pub decode_failures: AtomicU64,
    pub updates_applied: AtomicU64,
    pub empty_book_skips: AtomicU64,

    // Publishing
    pub metrics_published: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub polls_answered: AtomicU64,

    // Subscribers
    pub connected_subscribers: AtomicU64,
    pub subscriber_removals: AtomicU64,
    pub backpressure_drops: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            empty_book_skips: AtomicU64::new(0),
            metrics_published: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            polls_answered: AtomicU64::new(0),
            connected_subscribers: AtomicU64::new(0),
            subscriber_removals: AtomicU64::new(0),
            backpressure_drops: AtomicU64::new(0),
        }
    }

    /// Record a data frame read from the upstream session.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_applied(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_book(&self) {
        self.empty_book_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one broadcast and how many subscribers received it.
    pub fn record_publish(&self, delivered: u64) {
        self.metrics_published.fetch_add(1, Ordering::Relaxed);
        self.messages_delivered.fetch_add(delivered, Ordering::Relaxed);
    }

    pub fn record_poll(&self) {
        self.polls_answered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_removed(&self) {
        self.subscriber_removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Add messages a subscriber queue evicted on overflow.
    pub fn record_backpressure_drops(&self, dropped: u64) {
        self.backpressure_drops.fetch_add(dropped, Ordering::Relaxed);
    }

    /// Update connected subscriber count.
    pub fn set_connected_subscribers(&self, count: u64) {
        self.connected_subscribers.store(count, Ordering::Relaxed);
    }

    /// Export counters as a BTreeMap for JSON exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("frames_received".to_string(), self.frames_received.load(Ordering::Relaxed));
        m.insert("decode_failures".to_string(), self.decode_failures.load(Ordering::Relaxed));
        m.insert("updates_applied".to_string(), self.updates_applied.load(Ordering::Relaxed));
        m.insert("empty_book_skips".to_string(), self.empty_book_skips.load(Ordering::Relaxed));
        m.insert("metrics_published".to_string(), self.metrics_published.load(Ordering::Relaxed));
        m.insert("messages_delivered".to_string(), self.messages_delivered.load(Ordering::Relaxed));
        m.insert("polls_answered".to_string(), self.polls_answered.load(Ordering::Relaxed));
        m.insert("connected_subscribers".to_string(), self.connected_subscribers.load(Ordering::Relaxed));
        m.insert("subscriber_removals".to_string(), self.subscriber_removals.load(Ordering::Relaxed));
        m.insert("backpressure_drops".to_string(), self.backpressure_drops.load(Ordering::Relaxed));
        m
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = RelayMetrics::new();

        metrics.record_frame();
        metrics.record_frame();
        metrics.record_decode_failure();
        metrics.record_update_applied();

        let exported = metrics.export();
        assert_eq!(exported["frames_received"], 2);
        assert_eq!(exported["decode_failures"], 1);
        assert_eq!(exported["updates_applied"], 1);
    }

    #[test]
    fn test_metrics_export() {
        let metrics = RelayMetrics::new();
        metrics.record_publish(3);
        metrics.record_publish(2);
        metrics.record_poll();
        metrics.record_subscriber_removed();
        metrics.set_connected_subscribers(4);
        metrics.record_backpressure_drops(7);

        let exported = metrics.export();
        assert_eq!(exported["metrics_published"], 2);
        assert_eq!(exported["messages_delivered"], 5);
        assert_eq!(exported["polls_answered"], 1);
        assert_eq!(exported["subscriber_removals"], 1);
        assert_eq!(exported["connected_subscribers"], 4);
        assert_eq!(exported["backpressure_drops"], 7);
        assert_eq!(exported.len(), 10);
    }
}
