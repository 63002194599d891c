//! In-memory order book cache
//!
//! Mirrors the visible depth for a single symbol from incremental updates.
//! Uses `BTreeMap` keyed by `Decimal` price so each side iterates in price
//! order and numerically equal prices (`1.20`, `1.2`) share one key.
//!
//! The cache is owned by the ingestion task: `apply` and `compute_metric`
//! always run back to back on that task, so no lock is taken here.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::events::{DepthUpdateEvent, PriceLevel};

/// Errors raised when deriving a metric from the book.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("order book has no price levels")]
    EmptyBook,

    #[error("order book has {levels} levels but zero total quantity")]
    ZeroVolume { levels: usize },

    #[error("metric arithmetic overflowed over {levels} levels")]
    Overflow { levels: usize },
}

/// How a level with zero quantity is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZeroQuantityPolicy {
    /// Store the zero quantity like any other value. The book never shrinks.
    #[default]
    Retain,
    /// Treat zero quantity as removal of the price level.
    Remove,
}

/// A summary metric derived from both sides of the book.
pub trait MetricFormula: Send + Sync + fmt::Debug {
    fn compute(
        &self,
        asks: &BTreeMap<Decimal, Decimal>,
        bids: &BTreeMap<Decimal, Decimal>,
    ) -> Result<Decimal, BookError>;
}

/// Arithmetic mean of every distinct price key across both sides.
///
/// Quantities are ignored: this is not a volume-weighted price.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanPriceLevel;

impl MetricFormula for MeanPriceLevel {
    fn compute(
        &self,
        asks: &BTreeMap<Decimal, Decimal>,
        bids: &BTreeMap<Decimal, Decimal>,
    ) -> Result<Decimal, BookError> {
        let count = asks.len() + bids.len();
        if count == 0 {
            return Err(BookError::EmptyBook);
        }

        let overflow = BookError::Overflow { levels: count };
        let sum = asks
            .keys()
            .chain(bids.keys())
            .try_fold(Decimal::ZERO, |acc, price| acc.checked_add(*price))
            .ok_or(overflow.clone())?;
        sum.checked_div(Decimal::from(count)).ok_or(overflow)
    }
}

/// Quantity-weighted mean price across both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeWeightedPrice;

impl MetricFormula for VolumeWeightedPrice {
    fn compute(
        &self,
        asks: &BTreeMap<Decimal, Decimal>,
        bids: &BTreeMap<Decimal, Decimal>,
    ) -> Result<Decimal, BookError> {
        let levels = asks.len() + bids.len();
        if levels == 0 {
            return Err(BookError::EmptyBook);
        }

        let overflow = BookError::Overflow { levels };
        let (notional, volume) = asks
            .iter()
            .chain(bids.iter())
            .try_fold((Decimal::ZERO, Decimal::ZERO), |(n, v), (price, qty)| {
                let n = price.checked_mul(*qty).and_then(|pq| n.checked_add(pq))?;
                Some((n, v.checked_add(*qty)?))
            })
            .ok_or(overflow.clone())?;

        if volume.is_zero() {
            return Err(BookError::ZeroVolume { levels });
        }
        notional.checked_div(volume).ok_or(overflow)
    }
}

/// Selectable metric formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricKind {
    #[default]
    MeanPriceLevel,
    VolumeWeighted,
}

impl MetricKind {
    pub fn formula(self) -> Box<dyn MetricFormula> {
        match self {
            MetricKind::MeanPriceLevel => Box::new(MeanPriceLevel),
            MetricKind::VolumeWeighted => Box::new(VolumeWeightedPrice),
        }
    }
}

/// Live bid/ask depth for one symbol.
#[derive(Debug)]
pub struct OrderBookCache {
    /// Ask levels: price → quantity.
    asks: BTreeMap<Decimal, Decimal>,
    /// Bid levels: price → quantity.
    bids: BTreeMap<Decimal, Decimal>,
    zero_quantity: ZeroQuantityPolicy,
    formula: Box<dyn MetricFormula>,
    /// `u` of the last applied update.
    last_update_id: Option<u64>,
    updates_applied: u64,
}

impl OrderBookCache {
    /// Empty cache with the given zero-quantity policy and formula.
    pub fn new(zero_quantity: ZeroQuantityPolicy, formula: Box<dyn MetricFormula>) -> Self {
        Self {
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            zero_quantity,
            formula,
            last_update_id: None,
            updates_applied: 0,
        }
    }

    /// Retain zero quantities and publish the mean price level.
    pub fn with_defaults() -> Self {
        Self::new(ZeroQuantityPolicy::default(), Box::new(MeanPriceLevel))
    }

    /// Apply an update: every level is inserted or overwrites the stored
    /// quantity at its price. Levels are applied in received order.
    pub fn apply(&mut self, update: &DepthUpdateEvent) {
        for level in &update.asks {
            Self::apply_level(&mut self.asks, level, self.zero_quantity);
        }
        for level in &update.bids {
            Self::apply_level(&mut self.bids, level, self.zero_quantity);
        }

        self.last_update_id = Some(update.last_update_id);
        self.updates_applied += 1;

        trace!(
            last_update_id = update.last_update_id,
            asks = self.asks.len(),
            bids = self.bids.len(),
            "Applied depth update"
        );
    }

    fn apply_level(
        side: &mut BTreeMap<Decimal, Decimal>,
        level: &PriceLevel,
        policy: ZeroQuantityPolicy,
    ) {
        // A null or empty level on the wire decodes to the zero level.
        if *level == PriceLevel::zero() {
            return;
        }

        match policy {
            ZeroQuantityPolicy::Remove if level.is_zero_quantity() => {
                side.remove(&level.price);
            }
            _ => {
                side.insert(level.price, level.quantity);
            }
        }
    }

    /// Compute the configured metric over the current book.
    pub fn compute_metric(&self) -> Result<Decimal, BookError> {
        self.formula.compute(&self.asks, &self.bids)
    }

    pub fn ask_quantity(&self, price: Decimal) -> Option<Decimal> {
        self.asks.get(&price).copied()
    }

    pub fn bid_quantity(&self, price: Decimal) -> Option<Decimal> {
        self.bids.get(&price).copied()
    }

    pub fn ask_len(&self) -> usize {
        self.asks.len()
    }

    pub fn bid_len(&self) -> usize {
        self.bids.len()
    }

    /// Distinct price keys across both sides.
    pub fn level_count(&self) -> usize {
        self.asks.len() + self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Lowest ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Highest bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }

    pub fn zero_quantity_policy(&self) -> ZeroQuantityPolicy {
        self.zero_quantity
    }
}

impl Default for OrderBookCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}


// ── Property-Based Tests ────────────────────────────────────────────
