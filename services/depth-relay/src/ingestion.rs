//! Upstream depth feed ingestion
//!
//! Owns the streaming session to the exchange's per-symbol depth endpoint.
//! A dedicated read loop decodes each frame, applies it to the order book,
//! computes the metric and hands it to the publishing path. The book lives
//! inside the read loop task and nothing else touches it.
//!
//! Per frame:
//! - timeout / transport error / peer close → loop ends, disconnect signal
//! - undecodable frame → logged and dropped, loop continues
//! - empty book after apply → nothing published this cycle

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::events::{DecodeError, DepthUpdateEvent};
use crate::lifecycle::{ConnectionState, DisconnectReason, DisconnectWaiter, SessionLifecycle};
use crate::metrics::RelayMetrics;
use crate::order_book::{BookError, MetricKind, OrderBookCache, ZeroQuantityPolicy};

/// WebSocket stream type produced by [`FeedSession::connect`].
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type CloseSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Errors establishing the upstream session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("invalid feed url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("websocket handshake failed: {0}")]
    WebSocket(#[from] WsError),
}

/// Errors on an established session.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to send close frame: {0}")]
    Close(#[source] WsError),
}

/// Outcome of ingesting one frame that did not yield a metric.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Book(#[from] BookError),

    /// Not produced by the built-in formulas; a custom `MetricFormula` may
    /// return a value outside the `f64` conversion.
    #[error("metric {0} is not representable as f64")]
    Unrepresentable(Decimal),
}

/// Configuration for the upstream feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Stream base, the depth path is appended: `<base_url>/<symbol>@depth`.
    pub base_url: String,
    /// Maximum wait for the next frame before the session is considered dead.
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub zero_quantity: ZeroQuantityPolicy,
    pub metric: MetricKind,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://stream.binance.com:9443/ws".to_string(),
            idle_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            zero_quantity: ZeroQuantityPolicy::default(),
            metric: MetricKind::default(),
        }
    }
}

/// Build the per-symbol depth endpoint url. The symbol is lower-cased.
pub fn depth_stream_url(base_url: &str, symbol: &str) -> Result<Url, ConnectError> {
    let symbol = symbol.trim();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConnectError::InvalidSymbol(symbol.to_string()));
    }

    let url = format!(
        "{}/{}@depth",
        base_url.trim_end_matches('/'),
        symbol.to_ascii_lowercase()
    );
    Ok(Url::parse(&url)?)
}

fn tls_connector() -> Result<Connector, ConnectError> {
    let mut root_store = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for error in &certs.errors {
        debug!(error = %error, "Skipping unreadable native certificate");
    }
    for cert in certs.certs {
        let _ = root_store.add(cert);
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConnectError::Tls(e.to_string()))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(config)))
}

/// Synchronous frame processing: decode, apply, compute.
pub struct DepthIngester {
    book: OrderBookCache,
    metrics: Arc<RelayMetrics>,
}

impl DepthIngester {
    pub fn new(book: OrderBookCache, metrics: Arc<RelayMetrics>) -> Self {
        Self { book, metrics }
    }

    /// Ingest one raw frame and return the metric to publish.
    pub fn ingest_frame(&mut self, payload: &[u8]) -> Result<f64, IngestionError> {
        self.metrics.record_frame();

        let event = DepthUpdateEvent::decode(payload).inspect_err(|_| {
            self.metrics.record_decode_failure();
        })?;
        self.apply(&event)
    }

    /// Apply a decoded update and return the metric to publish.
    pub fn apply(&mut self, event: &DepthUpdateEvent) -> Result<f64, IngestionError> {
        self.book.apply(event);
        self.metrics.record_update_applied();

        let metric = self.book.compute_metric().inspect_err(|e| {
            if *e == BookError::EmptyBook {
                self.metrics.record_empty_book();
            }
        })?;
        metric
            .to_f64()
            .ok_or(IngestionError::Unrepresentable(metric))
    }

    pub fn book(&self) -> &OrderBookCache {
        &self.book
    }
}

/// An established, not yet started, upstream session.
pub struct FeedSession<S> {
    symbol: String,
    stream: S,
    idle_timeout: Duration,
    ingester: DepthIngester,
}

impl FeedSession<WsStream> {
    /// Connect to the depth stream for `symbol`.
    pub async fn connect(config: &FeedConfig, symbol: &str) -> Result<Self, ConnectError> {
        let url = depth_stream_url(&config.base_url, symbol)?;
        let connector = match url.scheme() {
            "wss" => Some(tls_connector()?),
            "ws" => None,
            other => return Err(ConnectError::UnsupportedScheme(other.to_string())),
        };

        info!(%url, "Connecting to depth stream");
        let handshake = connect_async_tls_with_config(url.as_str(), None, false, connector);
        let (stream, response) = tokio::time::timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| ConnectError::Timeout(config.connect_timeout))??;

        debug!(status = ?response.status(), "Depth stream handshake complete");
        Ok(Self::from_stream(symbol, stream, config))
    }
}

impl<S> FeedSession<S>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    /// Wrap an already established stream.
    pub fn from_stream(symbol: &str, stream: S, config: &FeedConfig) -> Self {
        let book = OrderBookCache::new(config.zero_quantity, config.metric.formula());
        Self {
            symbol: symbol.to_string(),
            stream,
            idle_timeout: config.idle_timeout,
            ingester: DepthIngester::new(book, Arc::new(RelayMetrics::new())),
        }
    }

    /// Share counters with the rest of the relay.
    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.ingester.metrics = metrics;
        self
    }

    pub fn set_idle_timeout(&mut self, idle_timeout: Duration) {
        self.idle_timeout = idle_timeout;
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Spawn the read loop. Metrics are sent on `metric_tx`.
    pub fn start(self, metric_tx: mpsc::Sender<f64>) -> (FeedHandle, DisconnectWaiter) {
        let (lifecycle, waiter) = SessionLifecycle::open();
        let (writer, reader) = self.stream.split();

        info!(
            symbol = %self.symbol,
            idle_timeout = ?self.idle_timeout,
            "Starting depth feed read loop"
        );
        let task = tokio::spawn(read_loop(
            reader,
            self.ingester,
            self.idle_timeout,
            metric_tx,
            CloseOnExit::new(lifecycle.clone()),
        ));

        let handle = FeedHandle {
            writer: Mutex::new(Box::pin(writer)),
            lifecycle,
            task,
        };
        (handle, waiter)
    }
}

/// Control side of a running session.
pub struct FeedHandle {
    writer: Mutex<CloseSink>,
    lifecycle: Arc<SessionLifecycle>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Send a normal close frame. Returns false if the session was not open.
    pub async fn close(&self) -> Result<bool, FeedError> {
        if !self.lifecycle.begin_close() {
            return Ok(false);
        }

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        };
        self.writer
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(FeedError::Close)?;
        debug!("Sent close frame to depth stream");
        Ok(true)
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> Arc<SessionLifecycle> {
        self.lifecycle.clone()
    }

    /// Stop the read loop without a close handshake.
    pub fn abort(&self) {
        self.task.abort();
        self.lifecycle.mark_closed(DisconnectReason::Aborted);
    }
}

/// Raises the disconnect signal when the read loop exits, including by
/// panic or cancellation before the first poll.
struct CloseOnExit {
    lifecycle: Arc<SessionLifecycle>,
    reason: Option<DisconnectReason>,
}

impl CloseOnExit {
    fn new(lifecycle: Arc<SessionLifecycle>) -> Self {
        Self {
            lifecycle,
            reason: None,
        }
    }

    fn close(mut self, reason: DisconnectReason) {
        self.reason = Some(reason);
    }
}

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        let reason = self.reason.take().unwrap_or(DisconnectReason::Aborted);
        self.lifecycle.mark_closed(reason);
    }
}

async fn read_loop<R>(
    mut reader: R,
    mut ingester: DepthIngester,
    idle_timeout: Duration,
    metric_tx: mpsc::Sender<f64>,
    guard: CloseOnExit,
) where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let reason = loop {
        let message = match tokio::time::timeout(idle_timeout, reader.next()).await {
            Err(_) => break DisconnectReason::IdleTimeout(idle_timeout),
            Ok(None) => break DisconnectReason::StreamEnded,
            Ok(Some(Err(e))) => {
                warn!(error = %e, "Depth stream read error");
                break DisconnectReason::Transport(e.to_string());
            }
            Ok(Some(Ok(message))) => message,
        };

        let result = match &message {
            Message::Text(text) => ingester.ingest_frame(text.as_bytes()),
            Message::Binary(data) => ingester.ingest_frame(data),
            Message::Close(frame) => {
                let reason = frame
                    .as_ref()
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                break DisconnectReason::Closed(reason);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        match result {
            Ok(metric) => {
                if metric_tx.send(metric).await.is_err() {
                    break DisconnectReason::PublisherGone;
                }
            }
            Err(IngestionError::Decode(e)) => {
                warn!(error = %e, "Dropping undecodable depth frame");
            }
            Err(IngestionError::Book(e @ BookError::Overflow { .. })) => {
                warn!(error = %e, "Skipping metric");
            }
            Err(IngestionError::Book(e)) => {
                debug!(error = %e, "No metric for this update");
            }
            Err(e @ IngestionError::Unrepresentable(_)) => {
                warn!(error = %e, "Skipping metric");
            }
        }
    };

    let book = ingester.book();
    info!(
        %reason,
        updates_applied = book.updates_applied(),
        levels = book.level_count(),
        "Depth feed read loop stopped"
    );
    guard.close(reason);
}
