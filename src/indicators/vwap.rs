//! VWAP engine
//!
//! Running cumulative price*volume and volume per (symbol, UTC day).
//! Exposes the developing dVWAP and the previous complete day's pdVWAP.
//! Rollover is lazy on write: the first trade of a new day moves the
//! current accumulators into the previous-day slot before being applied.

use crate::indicators::TradeSink;
use crate::market::Trade;
use crate::storage::{StoreMessage, StoreWriter};
use crate::util::time::day_start_ms;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Accumulators for one (symbol, day)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VwapDay {
    pub day_start: i64,
    pub cumulative_pv: Decimal,
    pub cumulative_v: Decimal,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub trade_count: u64,
    pub start_time: Option<i64>,
    pub last_update_time: Option<i64>,
}

impl VwapDay {
    fn new(day_start: i64) -> Self {
        Self {
            day_start,
            cumulative_pv: Decimal::ZERO,
            cumulative_v: Decimal::ZERO,
            high: None,
            low: None,
            trade_count: 0,
            start_time: None,
            last_update_time: None,
        }
    }

    /// `cumulativePV / cumulativeV`, undefined at zero volume
    pub fn vwap(&self) -> Option<Decimal> {
        if self.cumulative_v.is_zero() {
            None
        } else {
            Some(self.cumulative_pv / self.cumulative_v)
        }
    }

    fn apply(&mut self, trade: &Trade) {
        self.cumulative_pv += trade.price * trade.quantity;
        self.cumulative_v += trade.quantity;
        self.trade_count += 1;
        self.high = Some(self.high.map_or(trade.price, |h| h.max(trade.price)));
        self.low = Some(self.low.map_or(trade.price, |l| l.min(trade.price)));
        if self.start_time.is_none() {
            self.start_time = Some(trade.timestamp);
        }
        self.last_update_time = Some(trade.timestamp);
    }
}

struct VwapState {
    current: VwapDay,
    previous: Option<VwapDay>,
}

impl VwapState {
    /// Roll forward (possibly across several idle days) to `day_start`
    fn roll_to(&mut self, day_start: i64, symbol: &str) {
        if day_start <= self.current.day_start {
            return;
        }
        let finished = std::mem::replace(&mut self.current, VwapDay::new(day_start));
        tracing::info!(
            symbol = %symbol,
            day_start = finished.day_start,
            vwap = ?finished.vwap(),
            "VWAP day rolled over"
        );
        self.previous = Some(finished);
    }
}

/// Snapshot exposed to the key-levels tool
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VwapSnapshot {
    pub d_vwap: Option<Decimal>,
    pub pd_vwap: Option<Decimal>,
    pub developing: Option<VwapDay>,
    pub previous_day: Option<VwapDay>,
}

/// VWAP per symbol with lazy UTC-day rollover
pub struct VwapEngine {
    states: RwLock<HashMap<String, VwapState>>,
    writer: StoreWriter,
}

impl VwapEngine {
    pub fn new(writer: StoreWriter) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            writer,
        }
    }

    pub async fn snapshot(&self, symbol: &str) -> VwapSnapshot {
        let states = self.states.read().await;
        match states.get(&symbol.to_uppercase()) {
            Some(state) => {
                // Only the immediately preceding day counts as "previous";
                // after an idle day the slot is stale
                let previous = state
                    .previous
                    .as_ref()
                    .filter(|d| d.day_start == state.current.day_start - crate::util::time::MS_PER_DAY);
                VwapSnapshot {
                    d_vwap: state.current.vwap(),
                    pd_vwap: previous.and_then(|d| d.vwap()),
                    developing: Some(state.current.clone()),
                    previous_day: previous.cloned(),
                }
            }
            None => VwapSnapshot {
                d_vwap: None,
                pd_vwap: None,
                developing: None,
                previous_day: None,
            },
        }
    }
}

#[async_trait]
impl TradeSink for VwapEngine {
    fn name(&self) -> &'static str {
        "vwap"
    }

    async fn on_trade(&self, trade: &Trade) {
        let day_start = day_start_ms(trade.timestamp);
        let mut states = self.states.write().await;
        let state = states
            .entry(trade.symbol.clone())
            .or_insert_with(|| VwapState {
                current: VwapDay::new(day_start),
                previous: None,
            });

        state.roll_to(day_start, &trade.symbol);
        state.current.apply(trade);

        self.writer.send(StoreMessage::VwapIncrement {
            symbol: trade.symbol.clone(),
            date: day_start,
            pv: trade.price * trade.quantity,
            volume: trade.quantity,
            timestamp: trade.timestamp,
        });
    }

    async fn on_rollover(&self, day_start: i64) {
        let mut states = self.states.write().await;
        for (symbol, state) in states.iter_mut() {
            state.roll_to(day_start, symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::util::time::MS_PER_DAY;
    use std::str::FromStr;
    use std::sync::Arc;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn trade(price: &str, qty: &str, ts: i64) -> Trade {
        Trade {
            agg_trade_id: 0,
            symbol: "BTCUSDT".into(),
            price: dec(price),
            quantity: dec(qty),
            timestamp: ts,
            is_buyer_maker: false,
        }
    }

    fn engine() -> VwapEngine {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        VwapEngine::new(StoreWriter::spawn(store))
    }

    #[tokio::test]
    async fn test_vwap_of_three_trades() {
        let engine = engine();
        engine.on_trade(&trade("50000", "1.0", 1_000)).await;
        engine.on_trade(&trade("51000", "2.0", 2_000)).await;
        engine.on_trade(&trade("49000", "1.0", 3_000)).await;

        let snap = engine.snapshot("BTCUSDT").await;
        let developing = snap.developing.unwrap();
        assert_eq!(developing.cumulative_pv, dec("201000"));
        assert_eq!(developing.cumulative_v, dec("4.0"));
        assert_eq!(snap.d_vwap, Some(dec("50250")));
    }

    #[tokio::test]
    async fn test_vwap_bounded_by_observed_prices() {
        let engine = engine();
        for (p, q) in [("50000", "1.3"), ("51000", "0.7"), ("49500", "2.1")] {
            engine.on_trade(&trade(p, q, 1_000)).await;
        }
        let snap = engine.snapshot("BTCUSDT").await;
        let day = snap.developing.unwrap();
        let vwap = day.vwap().unwrap();
        assert!(vwap >= day.low.unwrap() && vwap <= day.high.unwrap());
    }

    #[tokio::test]
    async fn test_empty_vwap_undefined() {
        let engine = engine();
        let snap = engine.snapshot("BTCUSDT").await;
        assert!(snap.d_vwap.is_none());
        assert!(snap.pd_vwap.is_none());
    }

    #[tokio::test]
    async fn test_lazy_rollover_on_trade_past_midnight() {
        let engine = engine();
        engine.on_trade(&trade("50000", "1.0", 1_000)).await;
        // First trade of the next UTC day (exactly at the boundary) credits
        // the new day
        engine.on_trade(&trade("60000", "2.0", MS_PER_DAY)).await;

        let snap = engine.snapshot("BTCUSDT").await;
        assert_eq!(snap.pd_vwap, Some(dec("50000")));
        assert_eq!(snap.d_vwap, Some(dec("60000")));
        assert_eq!(snap.developing.unwrap().day_start, MS_PER_DAY);
    }

    #[tokio::test]
    async fn test_scheduled_rollover_then_trade() {
        let engine = engine();
        engine.on_trade(&trade("50000", "1.0", 1_000)).await;
        engine.on_rollover(MS_PER_DAY).await;

        let snap = engine.snapshot("BTCUSDT").await;
        assert!(snap.d_vwap.is_none());
        assert_eq!(snap.pd_vwap, Some(dec("50000")));

        // A trade arriving after the timer fired must not roll again
        engine.on_trade(&trade("61000", "1.0", MS_PER_DAY + 5)).await;
        let snap = engine.snapshot("BTCUSDT").await;
        assert_eq!(snap.d_vwap, Some(dec("61000")));
        assert_eq!(snap.pd_vwap, Some(dec("50000")));
    }
}
