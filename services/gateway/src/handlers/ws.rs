use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use depth_relay::OutboundQueue;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One subscriber connection.
///
/// The writer task drains the subscriber's queue onto the socket. The read
/// side treats every data message as a poll for the latest value.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let queue = Arc::new(OutboundQueue::new(state.queue_capacity, state.drop_policy));
    let handle = state.registry.register(queue.clone());
    let id = handle.id();
    state
        .metrics
        .set_connected_subscribers(state.registry.len() as u64);
    info!(subscriber = %id, "Subscriber connected");

    let mut send_task = {
        let queue = queue.clone();
        tokio::spawn(async move {
            while let Some(payload) = queue.next().await {
                if let Err(e) = ws_tx.send(Message::text(payload)).await {
                    debug!(error = %e, "Subscriber write failed");
                    break;
                }
            }
            queue.close();
            let _ = ws_tx.close().await;
        })
    };

    let mut writer_done = false;
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    if state.publisher.handle_poll(&handle).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(subscriber = %id, error = %e, "Subscriber read error");
                    break;
                }
            },
            _ = &mut send_task => {
                writer_done = true;
                break;
            }
        }
    }

    state.publisher.remove(id);
    queue.close();
    state
        .metrics
        .record_backpressure_drops(queue.messages_dropped());
    if !writer_done {
        let _ = send_task.await;
    }
    info!(subscriber = %id, "Subscriber disconnected");
}
