//! Delta and Cumulative Volume Delta engine
//!
//! Per-(symbol, timeframe) delta bars plus a running CVD per symbol.
//! CVD is signed trade volume (taker buys positive); it survives the
//! UTC-day rollover unless configured to reset. A divergence probe over
//! the recent bars flags price/delta disagreement.

use crate::config::TRACKED_TIMEFRAMES;
use crate::indicators::TradeSink;
use crate::market::Trade;
use crate::util::time::{align_to_timeframe, day_start_ms, timeframe_ms};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Completed delta bars retained per (symbol, timeframe)
const BAR_RING_SIZE: usize = 1000;

/// Buy/sell volume bucketed into one timeframe period
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBar {
    pub open_time: i64,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub trade_count: u64,
    pub close: Option<Decimal>,
}

impl DeltaBar {
    fn new(open_time: i64) -> Self {
        Self {
            open_time,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            trade_count: 0,
            close: None,
        }
    }

    pub fn delta(&self) -> Decimal {
        self.buy_volume - self.sell_volume
    }

    pub fn total_volume(&self) -> Decimal {
        self.buy_volume + self.sell_volume
    }

    /// Delta as a percentage of total volume (0 when the bar is empty)
    pub fn delta_percent(&self) -> f64 {
        let total = self.total_volume();
        if total.is_zero() {
            return 0.0;
        }
        (self.delta() / total * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }

    fn apply(&mut self, trade: &Trade) {
        self.trade_count += 1;
        self.close = Some(trade.price);
        if trade.is_buyer_maker {
            self.sell_volume += trade.quantity;
        } else {
            self.buy_volume += trade.quantity;
        }
    }
}

struct TimeframeDeltas {
    current: DeltaBar,
    completed: VecDeque<DeltaBar>,
}

struct DeltaState {
    cvd: Decimal,
    cvd_day_start: i64,
    by_timeframe: HashMap<&'static str, TimeframeDeltas>,
}

/// Direction of a detected price/delta divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergenceKind {
    /// Price falling while delta rises
    Bullish,
    /// Price rising while delta falls
    Bearish,
}

/// Divergence probe result over a bar window
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub detected: bool,
    pub kind: Option<DivergenceKind>,
    pub bars_examined: usize,
}

/// Probe the last `lookback` bars: split into halves, compare the average
/// close against the summed delta. Opposite trends flag a divergence.
pub fn detect_divergence(bars: &[DeltaBar], lookback: usize) -> Divergence {
    let window: Vec<&DeltaBar> = bars.iter().rev().take(lookback).rev().collect();
    if window.len() < 4 {
        return Divergence {
            detected: false,
            kind: None,
            bars_examined: window.len(),
        };
    }

    let mid = window.len() / 2;
    let (first, second) = window.split_at(mid);

    let avg_close = |half: &[&DeltaBar]| -> Option<Decimal> {
        let closes: Vec<Decimal> = half.iter().filter_map(|b| b.close).collect();
        if closes.is_empty() {
            None
        } else {
            Some(closes.iter().copied().sum::<Decimal>() / Decimal::from(closes.len() as i64))
        }
    };
    let delta_sum = |half: &[&DeltaBar]| -> Decimal { half.iter().map(|b| b.delta()).sum() };

    let (Some(first_close), Some(second_close)) = (avg_close(first), avg_close(second)) else {
        return Divergence {
            detected: false,
            kind: None,
            bars_examined: window.len(),
        };
    };

    let price_trend = second_close - first_close;
    let delta_trend = delta_sum(second) - delta_sum(first);

    let kind = if price_trend < Decimal::ZERO && delta_trend > Decimal::ZERO {
        Some(DivergenceKind::Bullish)
    } else if price_trend > Decimal::ZERO && delta_trend < Decimal::ZERO {
        Some(DivergenceKind::Bearish)
    } else {
        None
    };

    Divergence {
        detected: kind.is_some(),
        kind,
        bars_examined: window.len(),
    }
}

/// CVD summary statistics over recent bars
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CvdSummary {
    pub current_cvd: Decimal,
    pub period_delta: Decimal,
    pub avg_delta: Decimal,
    pub max_delta: Decimal,
    pub min_delta: Decimal,
    pub bar_count: usize,
}

/// Delta bars and running CVD per symbol
pub struct DeltaCvdEngine {
    states: RwLock<HashMap<String, DeltaState>>,
    /// Whether the running CVD resets at UTC-day rollover
    reset_on_rollover: bool,
}

impl DeltaCvdEngine {
    pub fn new(reset_on_rollover: bool) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            reset_on_rollover,
        }
    }

    /// Running CVD for a symbol (zero when unseen)
    pub async fn cvd(&self, symbol: &str) -> Decimal {
        self.states
            .read()
            .await
            .get(&symbol.to_uppercase())
            .map_or(Decimal::ZERO, |s| s.cvd)
    }

    /// Delta bars within `[start, end)`, oldest first, including the
    /// developing bar, capped at `limit`
    pub async fn bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Vec<DeltaBar> {
        let states = self.states.read().await;
        let Some(slot) = states
            .get(&symbol.to_uppercase())
            .and_then(|s| s.by_timeframe.get(timeframe))
        else {
            return Vec::new();
        };

        let in_range = |bar: &DeltaBar| {
            start_time.map_or(true, |s| bar.open_time >= s)
                && end_time.map_or(true, |e| bar.open_time < e)
        };

        let mut bars: Vec<DeltaBar> = slot.completed.iter().filter(|b| in_range(b)).cloned().collect();
        if slot.current.trade_count > 0 && in_range(&slot.current) {
            bars.push(slot.current.clone());
        }
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        bars
    }

    /// Summary statistics over the most recent `lookback` bars
    pub async fn summary(&self, symbol: &str, timeframe: &str, lookback: usize) -> CvdSummary {
        let bars = self.bars(symbol, timeframe, None, None, lookback).await;
        let current_cvd = self.cvd(symbol).await;

        if bars.is_empty() {
            return CvdSummary {
                current_cvd,
                period_delta: Decimal::ZERO,
                avg_delta: Decimal::ZERO,
                max_delta: Decimal::ZERO,
                min_delta: Decimal::ZERO,
                bar_count: 0,
            };
        }

        let deltas: Vec<Decimal> = bars.iter().map(|b| b.delta()).collect();
        let period_delta: Decimal = deltas.iter().copied().sum();

        CvdSummary {
            current_cvd,
            period_delta,
            avg_delta: period_delta / Decimal::from(deltas.len() as i64),
            max_delta: deltas.iter().copied().max().unwrap_or(Decimal::ZERO),
            min_delta: deltas.iter().copied().min().unwrap_or(Decimal::ZERO),
            bar_count: bars.len(),
        }
    }
}

#[async_trait]
impl TradeSink for DeltaCvdEngine {
    fn name(&self) -> &'static str {
        "delta_cvd"
    }

    async fn on_trade(&self, trade: &Trade) {
        let day_start = day_start_ms(trade.timestamp);
        let mut states = self.states.write().await;
        let state = states
            .entry(trade.symbol.clone())
            .or_insert_with(|| DeltaState {
                cvd: Decimal::ZERO,
                cvd_day_start: day_start,
                by_timeframe: HashMap::new(),
            });

        // Lazy CVD reset when configured and the trade crosses midnight
        if self.reset_on_rollover && day_start > state.cvd_day_start {
            tracing::info!(symbol = %trade.symbol, cvd = %state.cvd, "CVD reset at day rollover");
            state.cvd = Decimal::ZERO;
        }
        if day_start > state.cvd_day_start {
            state.cvd_day_start = day_start;
        }

        state.cvd += trade.signed_volume();

        for tf in TRACKED_TIMEFRAMES {
            let tf_ms = timeframe_ms(tf).expect("tracked timeframes validated at startup");
            let open_time = align_to_timeframe(trade.timestamp, tf_ms);

            let slot = state
                .by_timeframe
                .entry(tf)
                .or_insert_with(|| TimeframeDeltas {
                    current: DeltaBar::new(open_time),
                    completed: VecDeque::new(),
                });

            if slot.current.open_time != open_time {
                let finished = std::mem::replace(&mut slot.current, DeltaBar::new(open_time));
                if finished.trade_count > 0 {
                    if slot.completed.len() >= BAR_RING_SIZE {
                        slot.completed.pop_front();
                    }
                    slot.completed.push_back(finished);
                }
            }

            slot.current.apply(trade);
        }
    }

    async fn on_rollover(&self, day_start: i64) {
        if !self.reset_on_rollover {
            return;
        }
        let mut states = self.states.write().await;
        for (symbol, state) in states.iter_mut() {
            if day_start > state.cvd_day_start {
                tracing::info!(symbol = %symbol, cvd = %state.cvd, "CVD reset at day rollover");
                state.cvd = Decimal::ZERO;
                state.cvd_day_start = day_start;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::MS_PER_DAY;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn trade(price: &str, qty: &str, buyer_maker: bool, ts: i64) -> Trade {
        Trade {
            agg_trade_id: 0,
            symbol: "BTCUSDT".into(),
            price: dec(price),
            quantity: dec(qty),
            timestamp: ts,
            is_buyer_maker: buyer_maker,
        }
    }

    #[tokio::test]
    async fn test_cvd_identity() {
        let engine = DeltaCvdEngine::new(false);
        // +1, -2, +5 => +4
        engine.on_trade(&trade("50000", "1", false, 1_000)).await;
        engine.on_trade(&trade("50000", "2", true, 2_000)).await;
        engine.on_trade(&trade("50000", "5", false, 3_000)).await;

        assert_eq!(engine.cvd("BTCUSDT").await, dec("4"));
    }

    #[tokio::test]
    async fn test_delta_bars_and_percent() {
        let engine = DeltaCvdEngine::new(false);
        engine.on_trade(&trade("50000", "3", false, 10_000)).await;
        engine.on_trade(&trade("50000", "1", true, 20_000)).await;

        let bars = engine.bars("BTCUSDT", "1m", None, None, 10).await;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].delta(), dec("2"));
        assert_eq!(bars[0].total_volume(), dec("4"));
        assert!((bars[0].delta_percent() - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_bar_rollover_keeps_completed() {
        let engine = DeltaCvdEngine::new(false);
        engine.on_trade(&trade("50000", "1", false, 30_000)).await;
        engine.on_trade(&trade("50000", "2", false, 70_000)).await;

        let bars = engine.bars("BTCUSDT", "1m", None, None, 10).await;
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open_time, 0);
        assert_eq!(bars[1].open_time, 60_000);
    }

    #[tokio::test]
    async fn test_cvd_survives_rollover_by_default() {
        let engine = DeltaCvdEngine::new(false);
        engine.on_trade(&trade("50000", "3", false, 1_000)).await;
        engine.on_trade(&trade("50000", "2", false, MS_PER_DAY + 1)).await;
        assert_eq!(engine.cvd("BTCUSDT").await, dec("5"));
    }

    #[tokio::test]
    async fn test_cvd_reset_when_configured() {
        let engine = DeltaCvdEngine::new(true);
        engine.on_trade(&trade("50000", "3", false, 1_000)).await;
        engine.on_trade(&trade("50000", "2", false, MS_PER_DAY + 1)).await;
        assert_eq!(engine.cvd("BTCUSDT").await, dec("2"));
    }

    #[test]
    fn test_divergence_bearish() {
        // Price rising, delta falling
        let mut bars = Vec::new();
        for i in 0..8i64 {
            let mut bar = DeltaBar::new(i * 60_000);
            bar.close = Some(Decimal::from(50_000 + i * 100));
            if i < 4 {
                bar.buy_volume = dec("10");
                bar.sell_volume = dec("2");
            } else {
                bar.buy_volume = dec("2");
                bar.sell_volume = dec("10");
            }
            bar.trade_count = 1;
            bars.push(bar);
        }

        let probe = detect_divergence(&bars, 20);
        assert!(probe.detected);
        assert_eq!(probe.kind, Some(DivergenceKind::Bearish));
    }

    #[test]
    fn test_divergence_none_when_aligned() {
        // Price and delta both rising
        let mut bars = Vec::new();
        for i in 0..8i64 {
            let mut bar = DeltaBar::new(i * 60_000);
            bar.close = Some(Decimal::from(50_000 + i * 100));
            bar.buy_volume = Decimal::from(i + 1);
            bar.trade_count = 1;
            bars.push(bar);
        }
        let probe = detect_divergence(&bars, 20);
        assert!(!probe.detected);
    }

    #[test]
    fn test_divergence_needs_enough_bars() {
        let bars = vec![DeltaBar::new(0), DeltaBar::new(60_000)];
        let probe = detect_divergence(&bars, 20);
        assert!(!probe.detected);
        assert_eq!(probe.bars_examined, 2);
    }
}
