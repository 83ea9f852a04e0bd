//! Sorted L2 orderbook for a single symbol
//!
//! Bid and ask levels live in `BTreeMap<Decimal, Decimal>`; bids iterate
//! high-to-low via `iter().rev()`, asks low-to-high. Zero-quantity levels
//! are never stored.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Depth aggregated within a percent band around mid
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthWithin {
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    /// bid - ask
    pub net_volume: Decimal,
    pub mid_price: Decimal,
    pub percent_range: Decimal,
}

/// Orderbook state for a single trading symbol
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Trading pair symbol (uppercase, e.g. "BTCUSDT")
    pub symbol: String,

    /// Bid levels: price -> quantity
    pub bids: BTreeMap<Decimal, Decimal>,

    /// Ask levels: price -> quantity
    pub asks: BTreeMap<Decimal, Decimal>,

    /// Final update ID of the last applied snapshot or diff
    pub last_update_id: i64,

    /// Event time of the last applied update (milliseconds)
    pub last_update_time: i64,

    /// True once the bridging diff after a snapshot has been applied and
    /// the diff chain is intact
    pub synced: bool,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            last_update_time: 0,
            synced: false,
        }
    }

    /// Highest bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Lowest ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Midpoint of best bid and best ask
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Upsert a bid level; zero quantity removes it (no-op when absent)
    pub fn update_bid(&mut self, price: Decimal, quantity: Decimal) {
        if quantity.is_zero() {
            self.bids.remove(&price);
        } else {
            self.bids.insert(price, quantity);
        }
    }

    /// Upsert an ask level; zero quantity removes it (no-op when absent)
    pub fn update_ask(&mut self, price: Decimal, quantity: Decimal) {
        if quantity.is_zero() {
            self.asks.remove(&price);
        } else {
            self.asks.insert(price, quantity);
        }
    }

    /// Whether best ask has crossed below best bid (corrupted book)
    pub fn is_crossed(&self) -> bool {
        matches!(
            (self.best_bid(), self.best_ask()),
            (Some(bid), Some(ask)) if ask <= bid
        )
    }

    /// Aggregate bid/ask volume within `percent` of mid
    ///
    /// Walks each side from the best price outward and stops at the first
    /// level outside `[mid * (1 - p/100), mid * (1 + p/100)]`.
    pub fn depth_within(&self, percent: Decimal) -> Option<DepthWithin> {
        let mid = self.mid_price()?;
        let fraction = percent / Decimal::ONE_HUNDRED;
        let lower = mid * (Decimal::ONE - fraction);
        let upper = mid * (Decimal::ONE + fraction);

        let mut bid_volume = Decimal::ZERO;
        for (price, qty) in self.bids.iter().rev() {
            if *price < lower {
                break;
            }
            bid_volume += *qty;
        }

        let mut ask_volume = Decimal::ZERO;
        for (price, qty) in self.asks.iter() {
            if *price > upper {
                break;
            }
            ask_volume += *qty;
        }

        Some(DepthWithin {
            bid_volume,
            ask_volume,
            net_volume: bid_volume - ask_volume,
            mid_price: mid,
            percent_range: percent,
        })
    }

    /// Top-of-book levels for serialization, best first
    pub fn top_levels(&self, depth: usize) -> (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>) {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(p, q)| (*p, *q))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(depth)
            .map(|(p, q)| (*p, *q))
            .collect();
        (bids, asks)
    }
}
