use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use depth_relay::ConnectionState;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub subscribers: usize,
    pub last_value: f64,
    pub feed_state: &'static str,
    pub counters: BTreeMap<String, u64>,
}

/// Relay status. Answers 503 once the upstream session has closed.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let feed_state = state.feed.state();
    let (code, status) = match feed_state {
        ConnectionState::Open => (StatusCode::OK, "ok"),
        ConnectionState::Closing | ConnectionState::Closed => {
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };

    let body = HealthResponse {
        status,
        subscribers: state.registry.len(),
        last_value: state.publisher.last_value(),
        feed_state: feed_state.as_str(),
        counters: state.metrics.export(),
    };
    (code, Json(body))
}
