//! Wire definitions for the upstream depth stream
//!
//! Decodes `<symbol>@depth` frames into [`DepthUpdateEvent`]s. Each side of
//! the update is a list of `[price, quantity]` pairs encoded as numeric
//! strings, e.g.:
//!
//! ```text
//! {"e":"depthUpdate","E":1708123456789,"s":"BTCUSDT","U":157,"u":160,
//!  "a":[["0.0026","100"]],"b":[["0.0024","10"]]}
//! ```
//!
//! Decoding is lenient: missing top-level fields default, and an absent,
//! `null` or empty-string level decodes to the zero level.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Errors raised while decoding an upstream frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed depth frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A single visible liquidity point on one side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Zero price and zero quantity.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Parse a level from its two numeric-string components.
    pub fn parse(price: &str, quantity: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Self {
            price: Decimal::from_str(price)?,
            quantity: Decimal::from_str(quantity)?,
        })
    }

    pub fn is_zero_quantity(&self) -> bool {
        self.quantity.is_zero()
    }
}

impl fmt::Display for PriceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.quantity, self.price)
    }
}

/// Encoded shapes a level may take on the wire.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Pair(Vec<String>),
    Text(String),
}

impl<'de> Deserialize<'de> for PriceLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<RawLevel>::deserialize(deserializer)? {
            None => Ok(PriceLevel::zero()),
            Some(RawLevel::Text(text)) if text.is_empty() => Ok(PriceLevel::zero()),
            Some(RawLevel::Text(text)) => Err(de::Error::custom(format!(
                "expected [price, quantity], got string {:?}",
                text
            ))),
            Some(RawLevel::Pair(parts)) => {
                if parts.len() < 2 {
                    return Err(de::Error::invalid_length(
                        parts.len(),
                        &"a [price, quantity] pair",
                    ));
                }
                PriceLevel::parse(&parts[0], &parts[1]).map_err(|e| {
                    de::Error::custom(format!(
                        "invalid level [{:?}, {:?}]: {}",
                        parts[0], parts[1], e
                    ))
                })
            }
        }
    }
}

impl Serialize for PriceLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.price.to_string())?;
        seq.serialize_element(&self.quantity.to_string())?;
        seq.end()
    }
}

/// An incremental depth update for one symbol.
///
/// Levels on each side are kept in the order they were received.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthUpdateEvent {
    #[serde(rename = "e")]
    pub event_name: String,
    /// Exchange event time, Unix milliseconds.
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub last_update_id: u64,
    #[serde(rename = "a")]
    pub asks: Vec<PriceLevel>,
    #[serde(rename = "b")]
    pub bids: Vec<PriceLevel>,
}

impl DepthUpdateEvent {
    /// Decode a raw frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Total number of levels carried by this update.
    pub fn level_count(&self) -> usize {
        self.asks.len() + self.bids.len()
    }
}
