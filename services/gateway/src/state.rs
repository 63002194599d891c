use std::sync::Arc;

use depth_relay::{
    DropPolicy, MetricPublisher, RelayMetrics, SessionLifecycle, SubscriberRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
    pub publisher: Arc<MetricPublisher>,
    pub metrics: Arc<RelayMetrics>,
    /// Upstream session, reported on `/health`.
    pub feed: Arc<SessionLifecycle>,
    pub queue_capacity: usize,
    pub drop_policy: DropPolicy,
}

impl AppState {
    pub fn new(
        publisher: Arc<MetricPublisher>,
        metrics: Arc<RelayMetrics>,
        feed: Arc<SessionLifecycle>,
        queue_capacity: usize,
        drop_policy: DropPolicy,
    ) -> Self {
        Self {
            registry: publisher.registry().clone(),
            publisher,
            metrics,
            feed,
            queue_capacity,
            drop_policy,
        }
    }
}
