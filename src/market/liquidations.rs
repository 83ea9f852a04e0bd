//! Liquidation cache and statistics
//!
//! Bounded FIFO of recent forced liquidations per symbol. A SELL forced
//! order closes a long position, a BUY forced order closes a short; the
//! statistics report in position terms.

use crate::market::Liquidation;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Aggregate statistics over a set of liquidations
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationStats {
    pub long_count: usize,
    pub short_count: usize,
    pub long_notional: Decimal,
    pub short_notional: Decimal,
    /// long - short notional
    pub net_notional: Decimal,
    /// "longs", "shorts" or "neutral"
    pub dominant_side: &'static str,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

impl LiquidationStats {
    /// Compute statistics over liquidations (any order)
    pub fn compute(liquidations: &[Liquidation]) -> Self {
        let mut long_count = 0usize;
        let mut short_count = 0usize;
        let mut long_notional = Decimal::ZERO;
        let mut short_notional = Decimal::ZERO;
        let mut oldest: Option<i64> = None;
        let mut newest: Option<i64> = None;

        for liq in liquidations {
            // SELL order = long position forced out
            if liq.side.eq_ignore_ascii_case("SELL") {
                long_count += 1;
                long_notional += liq.notional();
            } else {
                short_count += 1;
                short_notional += liq.notional();
            }

            oldest = Some(oldest.map_or(liq.timestamp, |t: i64| t.min(liq.timestamp)));
            newest = Some(newest.map_or(liq.timestamp, |t: i64| t.max(liq.timestamp)));
        }

        let net_notional = long_notional - short_notional;
        let dominant_side = if net_notional > Decimal::ZERO {
            "longs"
        } else if net_notional < Decimal::ZERO {
            "shorts"
        } else {
            "neutral"
        };

        Self {
            long_count,
            short_count,
            long_notional,
            short_notional,
            net_notional,
            dominant_side,
            oldest_timestamp: oldest,
            newest_timestamp: newest,
        }
    }
}

/// Bounded per-symbol ring of recent liquidation events
pub struct LiquidationCache {
    max_size: usize,
    rings: RwLock<HashMap<String, VecDeque<Liquidation>>>,
}

impl LiquidationCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            rings: RwLock::new(HashMap::new()),
        }
    }

    /// Append an event, evicting the oldest when the ring is full
    pub async fn add(&self, liquidation: Liquidation) {
        let mut rings = self.rings.write().await;
        let ring = rings
            .entry(liquidation.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(64));

        if ring.len() >= self.max_size {
            ring.pop_front();
        }
        ring.push_back(liquidation);
    }

    /// Most recent events, newest first, optionally filtered by side
    pub async fn recent(
        &self,
        symbol: &str,
        limit: usize,
        side: Option<&str>,
    ) -> Vec<Liquidation> {
        let rings = self.rings.read().await;
        let Some(ring) = rings.get(&symbol.to_uppercase()) else {
            return Vec::new();
        };

        ring.iter()
            .rev()
            .filter(|liq| side.map_or(true, |s| liq.side.eq_ignore_ascii_case(s)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self, symbol: &str) -> usize {
        self.rings
            .read()
            .await
            .get(&symbol.to_uppercase())
            .map_or(0, |r| r.len())
    }
}
