//! Depth Relay
//!
//! Maintains a live order book for one symbol from an exchange depth stream
//! and relays a single derived metric to connected subscribers:
//! - Upstream session with idle timeout and graceful close
//! - Order book cache keyed by exact decimal price
//! - Pluggable metric formula (mean price level by default)
//! - Subscriber registry with per-subscriber bounded queues
//! - Push on every update plus on-demand polling of the latest value
//!
//! # Architecture
//!
//! ```text
//! Exchange depth stream
//!        │
//!    ┌───▼────┐
//!    │ Feed   │  ← read loop, idle timeout, disconnect signal
//!    └───┬────┘
//!        │ decode + apply
//!    ┌───▼────┐
//!    │ Book   │  ← owned by the read loop
//!    └───┬────┘
//!        │ metric (mpsc)
//!    ┌───▼──────┐      poll
//!    │Publisher │◄──────────────┐
//!    └───┬──────┘               │
//!        │ snapshot fan-out     │
//! ┌──────▼────────────┐   ┌─────┴──────┐
//! │ Registry / Queues ├──►│ Subscribers│
//! └───────────────────┘   └────────────┘
//! ```

pub mod backpressure;
pub mod events;
pub mod ingestion;
pub mod lifecycle;
pub mod metrics;
pub mod order_book;
pub mod publisher;
pub mod websocket;

pub use backpressure::{DropPolicy, OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use events::{DecodeError, DepthUpdateEvent, PriceLevel};
pub use ingestion::{
    depth_stream_url, ConnectError, DepthIngester, FeedConfig, FeedError, FeedHandle, FeedSession,
    IngestionError,
};
pub use lifecycle::{ConnectionState, DisconnectReason, DisconnectWaiter, SessionLifecycle};
pub use metrics::RelayMetrics;
pub use order_book::{
    BookError, MeanPriceLevel, MetricFormula, MetricKind, OrderBookCache, VolumeWeightedPrice,
    ZeroQuantityPolicy,
};
pub use publisher::{format_metric, BroadcastOutcome, MetricPublisher};
pub use websocket::{DeliveryError, SubscriberHandle, SubscriberId, SubscriberRegistry, SubscriberSink};

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
