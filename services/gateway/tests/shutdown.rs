//! Interrupt shutdown against local upstreams.

use std::time::Duration;

use depth_relay::{ConnectionState, DisconnectReason, FeedConfig, FeedSession};
use futures::StreamExt;
use gateway::shutdown;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

/// Upstream that completes the handshake. When `answer_close` is false it
/// never reads again, so a close frame goes unanswered.
async fn spawn_upstream(answer_close: bool) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        if answer_close {
            while let Some(Ok(_)) = ws.next().await {}
        }
        let _ = stop_rx.await;
    });

    (base_url, stop_tx)
}

fn config(base_url: String) -> FeedConfig {
    FeedConfig {
        base_url,
        idle_timeout: Duration::from_secs(30),
        ..FeedConfig::default()
    }
}

#[tokio::test]
async fn test_shutdown_completes_close_handshake() {
    let (base_url, _stop) = spawn_upstream(true).await;
    let session = FeedSession::connect(&config(base_url), "BTCUSDT").await.unwrap();
    let (tx, _rx) = mpsc::channel(1);
    let (feed, disconnected) = session.start(tx);

    let reason = shutdown(&feed, disconnected, Duration::from_secs(5)).await;

    assert!(matches!(reason, Some(DisconnectReason::Closed(_))));
    assert_eq!(feed.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_shutdown_aborts_silent_upstream() {
    let (base_url, _stop) = spawn_upstream(false).await;
    let session = FeedSession::connect(&config(base_url), "BTCUSDT").await.unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    let (feed, disconnected) = session.start(tx);

    let reason = shutdown(&feed, disconnected, Duration::from_millis(200)).await;

    assert_eq!(reason, None);
    assert_eq!(feed.state(), ConnectionState::Closed);
    let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(closed, None);
}
