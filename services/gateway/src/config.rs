//! Environment configuration for the relay gateway.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use depth_relay::{DropPolicy, FeedConfig, DEFAULT_QUEUE_CAPACITY};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is empty")]
    Empty { var: &'static str },

    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Gateway runtime settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub symbol: String,
    pub listen_addr: SocketAddr,
    /// Route subscribers connect to.
    pub ws_path: String,
    pub feed: FeedConfig,
    /// Bound on waiting for the upstream close handshake at shutdown.
    pub shutdown_timeout: Duration,
    pub metric_channel_capacity: usize,
    pub subscriber_queue_capacity: usize,
    pub drop_policy: DropPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            ws_path: "/ws/ticker".to_string(),
            feed: FeedConfig::default(),
            shutdown_timeout: Duration::from_millis(1000),
            metric_channel_capacity: 1,
            subscriber_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(symbol) = lookup("RELAY_SYMBOL") {
            let symbol = symbol.trim();
            if symbol.is_empty() {
                return Err(ConfigError::Empty { var: "RELAY_SYMBOL" });
            }
            config.symbol = symbol.to_ascii_uppercase();
        }
        if let Some(addr) = lookup("RELAY_LISTEN_ADDR") {
            config.listen_addr = parse("RELAY_LISTEN_ADDR", &addr)?;
        }
        if let Some(path) = lookup("RELAY_WS_PATH") {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    var: "RELAY_WS_PATH",
                    value: path,
                    reason: "must start with '/'".to_string(),
                });
            }
            config.ws_path = path;
        }
        if let Some(url) = lookup("RELAY_FEED_URL") {
            if url.trim().is_empty() {
                return Err(ConfigError::Empty { var: "RELAY_FEED_URL" });
            }
            config.feed.base_url = url.trim().to_string();
        }
        if let Some(secs) = lookup("RELAY_IDLE_TIMEOUT_SECS") {
            let secs: u64 = parse("RELAY_IDLE_TIMEOUT_SECS", &secs)?;
            config.feed.idle_timeout = Duration::from_secs(positive("RELAY_IDLE_TIMEOUT_SECS", secs)?);
        }
        if let Some(ms) = lookup("RELAY_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout = Duration::from_millis(parse("RELAY_SHUTDOWN_TIMEOUT_MS", &ms)?);
        }
        if let Some(capacity) = lookup("RELAY_METRIC_CHANNEL_CAPACITY") {
            let capacity: usize = parse("RELAY_METRIC_CHANNEL_CAPACITY", &capacity)?;
            config.metric_channel_capacity = positive("RELAY_METRIC_CHANNEL_CAPACITY", capacity)?;
        }
        if let Some(capacity) = lookup("RELAY_SUBSCRIBER_QUEUE_CAPACITY") {
            let capacity: usize = parse("RELAY_SUBSCRIBER_QUEUE_CAPACITY", &capacity)?;
            config.subscriber_queue_capacity = positive("RELAY_SUBSCRIBER_QUEUE_CAPACITY", capacity)?;
        }
        if let Some(policy) = lookup("RELAY_DROP_POLICY") {
            config.drop_policy = match policy.trim().to_ascii_lowercase().as_str() {
                "drop-oldest" => DropPolicy::DropOldest,
                "disconnect" => DropPolicy::Disconnect,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "RELAY_DROP_POLICY",
                        value: policy,
                        reason: "expected drop-oldest or disconnect".to_string(),
                    });
                }
            };
        }

        Ok(config)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive<T>(var: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + ToString,
{
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.ws_path, "/ws/ticker");
        assert_eq!(config.feed.base_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(config.feed.idle_timeout, Duration::from_secs(15));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.metric_channel_capacity, 1);
        assert_eq!(config.subscriber_queue_capacity, 64);
        assert_eq!(config.drop_policy, DropPolicy::DropOldest);
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("RELAY_SYMBOL", "ethbtc"),
            ("RELAY_LISTEN_ADDR", "0.0.0.0:9000"),
            ("RELAY_WS_PATH", "/stream"),
            ("RELAY_FEED_URL", "ws://127.0.0.1:9443/ws"),
            ("RELAY_IDLE_TIMEOUT_SECS", "30"),
            ("RELAY_SHUTDOWN_TIMEOUT_MS", "250"),
            ("RELAY_SUBSCRIBER_QUEUE_CAPACITY", "8"),
            ("RELAY_DROP_POLICY", "disconnect"),
        ]))
        .unwrap();

        assert_eq!(config.symbol, "ETHBTC");
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.ws_path, "/stream");
        assert_eq!(config.feed.base_url, "ws://127.0.0.1:9443/ws");
        assert_eq!(config.feed.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.subscriber_queue_capacity, 8);
        assert_eq!(config.drop_policy, DropPolicy::Disconnect);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("RELAY_IDLE_TIMEOUT_SECS", "soon")])),
            Err(ConfigError::Invalid { var: "RELAY_IDLE_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("RELAY_METRIC_CHANNEL_CAPACITY", "0")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("RELAY_DROP_POLICY", "block")])),
            Err(ConfigError::Invalid { var: "RELAY_DROP_POLICY", .. })
        ));
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("RELAY_SYMBOL", "  ")])),
            Err(ConfigError::Empty { .. })
        ));
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("RELAY_WS_PATH", "ws/ticker")])),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
