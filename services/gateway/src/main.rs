use std::sync::Arc;

use anyhow::Context;
use depth_relay::{FeedSession, MetricPublisher, RelayMetrics, SubscriberRegistry};
use gateway::{AppState, GatewayConfig, create_router, shutdown};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env().context("invalid configuration")?;
    info!(
        symbol = %config.symbol,
        ws_path = %config.ws_path,
        version = depth_relay::SERVICE_VERSION,
        "Starting depth relay gateway"
    );

    let metrics = Arc::new(RelayMetrics::new());
    let registry = Arc::new(SubscriberRegistry::new());
    let publisher = Arc::new(MetricPublisher::new(registry, metrics.clone()));

    let session = FeedSession::connect(&config.feed, &config.symbol)
        .await
        .context("failed to connect to depth stream")?
        .with_metrics(metrics.clone());
    let (metric_tx, metric_rx) = mpsc::channel(config.metric_channel_capacity);
    let (feed, mut disconnected) = session.start(metric_tx);
    tokio::spawn(publisher.clone().run(metric_rx));

    let state = AppState::new(
        publisher,
        metrics,
        feed.lifecycle(),
        config.subscriber_queue_capacity,
        config.drop_policy,
    );
    let app = create_router(state, &config.ws_path);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);
    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        reason = &mut disconnected => {
            server.abort();
            anyhow::bail!("depth stream disconnected: {reason}");
        }
        result = &mut server => {
            feed.abort();
            result.context("server task panicked")??;
            anyhow::bail!("server stopped unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for interrupt")?;
            info!("Interrupt received, closing depth stream");
            shutdown(&feed, disconnected, config.shutdown_timeout).await;
            server.abort();
        }
    }

    Ok(())
}
