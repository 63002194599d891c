//! WebSocket gateway for the depth relay.
//!
//! Serves the relayed metric to subscribers and exposes relay health.

pub mod config;
pub mod handlers;
pub mod router;
pub mod shutdown;
pub mod state;

pub use config::{ConfigError, GatewayConfig};
pub use router::create_router;
pub use shutdown::shutdown;
pub use state::AppState;
