//! Subscriber registry for the downstream push channel
//!
//! Tracks every connected subscriber by a monotonic id. Registration happens
//! on the accept path, iteration on the broadcast path; both go through a
//! `DashMap` so neither blocks the other for longer than a shard lock.
//! Broadcasts iterate a [`SubscriberRegistry::snapshot`], so subscribers may
//! come and go while a fan-out is in progress.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

/// Unique subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Failure to hand a payload to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber connection closed")]
    Closed,

    #[error("subscriber lagging: outbound queue full ({capacity} messages)")]
    Lagging { capacity: usize },

    #[error("write to subscriber failed: {0}")]
    Write(String),
}

/// Outbound side of one subscriber connection.
pub trait SubscriberSink: Send + Sync + 'static {
    /// Hand a payload to the connection without waiting on the network.
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError>;
}

/// A registered subscriber. Cheap to clone.
#[derive(Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    sink: Arc<dyn SubscriberSink>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        self.sink.deliver(payload)
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle").field("id", &self.id).finish()
    }
}

/// Concurrent set of connected subscribers.
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, SubscriberHandle>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber and return its handle.
    pub fn register(&self, sink: Arc<dyn SubscriberSink>) -> SubscriberHandle {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = SubscriberHandle { id, sink };
        self.subscribers.insert(id, handle.clone());
        debug!(subscriber = %id, total = self.subscribers.len(), "Registered subscriber");
        handle
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, total = self.subscribers.len(), "Removed subscriber");
        }
        removed
    }

    /// Point-in-time copy of all subscribers, ordered by id.
    pub fn snapshot(&self) -> Vec<SubscriberHandle> {
        let mut handles: Vec<SubscriberHandle> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn sink() -> Arc<dyn SubscriberSink> {
        Arc::new(RecordingSink::default())
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let registry = SubscriberRegistry::new();
        let a = registry.register(sink());
        let b = registry.register(sink());

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.id()));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let handle = registry.register(sink());

        assert!(registry.remove(handle.id()));
        assert!(!registry.remove(handle.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_ordered_and_detached() {
        let registry = SubscriberRegistry::new();
        let ids: Vec<SubscriberId> = (0..5).map(|_| registry.register(sink()).id()).collect();

        let snapshot = registry.snapshot();
        registry.remove(ids[2]);
        registry.register(sink());

        let snapshot_ids: Vec<SubscriberId> = snapshot.iter().map(|h| h.id()).collect();
        assert_eq!(snapshot_ids, ids);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_handle_delivers_to_sink() {
        let registry = SubscriberRegistry::new();
        let recording = Arc::new(RecordingSink::default());
        let handle = registry.register(recording.clone());

        handle.deliver("42.5").unwrap();
        assert_eq!(*recording.received.lock().unwrap(), vec!["42.5".to_string()]);
    }

    #[test]
    fn test_concurrent_register_and_snapshot() {
        let registry = Arc::new(SubscriberRegistry::new());

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let handle = registry.register(sink());
                        let _ = registry.snapshot();
                        if handle.id().0 % 2 == 0 {
                            registry.remove(handle.id());
                        }
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        // Ids 1..=800, odd ones remain.
        assert_eq!(registry.len(), 400);
        assert!(registry.snapshot().iter().all(|h| h.id().0 % 2 == 1));
    }
}
