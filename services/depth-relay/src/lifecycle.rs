//! Upstream session lifecycle
//!
//! `Open → Closing → Closed`, with `Closed` reachable from either of the
//! other states. Reaching `Closed` fires the disconnect signal exactly once;
//! later transitions are no-ops.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

/// Connection state of the upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// A close frame has been sent; waiting for the read loop to end.
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No frame arrived within the idle timeout.
    IdleTimeout(Duration),
    /// Read failed at the transport level.
    Transport(String),
    /// The peer sent a close frame.
    Closed(Option<String>),
    /// The stream ended without a close frame.
    StreamEnded,
    /// The metric receiver was dropped.
    PublisherGone,
    /// The session was dropped before reporting a reason.
    SessionDropped,
    /// The read loop was cancelled or panicked.
    Aborted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::IdleTimeout(d) => write!(f, "no frame within {:?}", d),
            DisconnectReason::Transport(e) => write!(f, "transport error: {}", e),
            DisconnectReason::Closed(Some(reason)) => write!(f, "closed by peer: {}", reason),
            DisconnectReason::Closed(None) => f.write_str("closed by peer"),
            DisconnectReason::StreamEnded => f.write_str("stream ended"),
            DisconnectReason::PublisherGone => f.write_str("metric receiver dropped"),
            DisconnectReason::SessionDropped => f.write_str("session dropped"),
            DisconnectReason::Aborted => f.write_str("read loop aborted"),
        }
    }
}

struct Inner {
    state: ConnectionState,
    disconnect_tx: Option<oneshot::Sender<DisconnectReason>>,
}

/// Shared state machine for one upstream session.
pub struct SessionLifecycle {
    inner: Mutex<Inner>,
}

impl SessionLifecycle {
    /// A new `Open` session and the single waiter for its disconnect signal.
    pub fn open() -> (Arc<Self>, DisconnectWaiter) {
        let (tx, rx) = oneshot::channel();
        let lifecycle = Arc::new(Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Open,
                disconnect_tx: Some(tx),
            }),
        });
        (lifecycle, DisconnectWaiter { rx })
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner.lock() {
            Ok(inner) => inner.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    /// `Open → Closing`. Returns false if the session was not open.
    pub fn begin_close(&self) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.state != ConnectionState::Open {
            return false;
        }
        inner.state = ConnectionState::Closing;
        debug!("Upstream session closing");
        true
    }

    /// Move to `Closed` and raise the disconnect signal.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn mark_closed(&self, reason: DisconnectReason) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.state == ConnectionState::Closed {
            return false;
        }
        inner.state = ConnectionState::Closed;

        info!(%reason, "Upstream session closed");
        if let Some(tx) = inner.disconnect_tx.take() {
            // The waiter may already be gone during process exit.
            let _ = tx.send(reason);
        }
        true
    }
}

/// Resolves once when the session reaches `Closed`.
#[derive(Debug)]
pub struct DisconnectWaiter {
    rx: oneshot::Receiver<DisconnectReason>,
}

impl Future for DisconnectWaiter {
    type Output = DisconnectReason;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(DisconnectReason::SessionDropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_transitions() {
        let (lifecycle, _waiter) = SessionLifecycle::open();
        assert_eq!(lifecycle.state(), ConnectionState::Open);

        assert!(lifecycle.begin_close());
        assert_eq!(lifecycle.state(), ConnectionState::Closing);
        assert!(!lifecycle.begin_close());

        assert!(lifecycle.mark_closed(DisconnectReason::Closed(None)));
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert!(!lifecycle.begin_close());
    }

    #[tokio::test]
    async fn test_disconnect_signal_fires_once() {
        let (lifecycle, waiter) = SessionLifecycle::open();

        assert!(lifecycle.mark_closed(DisconnectReason::StreamEnded));
        assert!(!lifecycle.mark_closed(DisconnectReason::Transport("late".to_string())));

        assert_eq!(waiter.await, DisconnectReason::StreamEnded);
    }

    #[tokio::test]
    async fn test_dropped_lifecycle_resolves_waiter() {
        let (lifecycle, waiter) = SessionLifecycle::open();
        drop(lifecycle);

        assert_eq!(waiter.await, DisconnectReason::SessionDropped);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
