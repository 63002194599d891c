//! Backpressure for subscriber fan-out
//!
//! Each subscriber gets a bounded outbound queue drained by its own writer
//! task. The publisher only ever enqueues, so a slow socket delays nobody but
//! its own subscriber. What happens on overflow is set by [`DropPolicy`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::websocket::{DeliveryError, SubscriberSink};

/// Drop policy when a subscriber's outbound queue overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DropPolicy {
    /// Disconnect the lagging subscriber.
    Disconnect,
    /// Drop oldest messages to make room for newer ones.
    #[default]
    DropOldest,
}

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Bounded outbound queue for one subscriber.
///
/// Many producers may call [`SubscriberSink::deliver`]; exactly one writer
/// task should consume via [`OutboundQueue::next`].
#[derive(Debug)]
pub struct OutboundQueue {
    messages: Mutex<VecDeque<String>>,
    capacity: usize,
    drop_policy: DropPolicy,
    notify: Notify,
    closed: AtomicBool,
    /// Total messages dropped for this subscriber.
    messages_dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            drop_policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Wait for the next message. Returns `None` once closed and drained.
    pub async fn next(&self) -> Option<String> {
        loop {
            {
                let mut messages = match self.messages.lock() {
                    Ok(messages) => messages,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(message) = messages.pop_front() {
                    return Some(message);
                }
                if self.is_closed() {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting messages and wake the writer. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(queued = self.len(), "Outbound queue closed");
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> usize {
        match self.messages.lock() {
            Ok(messages) => messages.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Total messages dropped for this subscriber.
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }
}

impl SubscriberSink for OutboundQueue {
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        {
            let mut messages = match self.messages.lock() {
                Ok(messages) => messages,
                Err(poisoned) => poisoned.into_inner(),
            };

            if messages.len() >= self.capacity {
                match self.drop_policy {
                    DropPolicy::Disconnect => {
                        drop(messages);
                        warn!(
                            capacity = self.capacity,
                            "Backpressure: disconnecting lagging subscriber"
                        );
                        self.close();
                        return Err(DeliveryError::Lagging {
                            capacity: self.capacity,
                        });
                    }
                    DropPolicy::DropOldest => {
                        messages.pop_front();
                        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!(dropped, "Backpressure: dropped oldest message");
                    }
                }
            }

            messages.push_back(payload.to_string());
        }

        self.notify.notify_one();
        Ok(())
    }
}
