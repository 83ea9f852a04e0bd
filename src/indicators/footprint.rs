//! Footprint bar structures
//!
//! A footprint bar annotates a candle with the buy and sell volume at each
//! discrete price level inside it. Bars are produced by the trade
//! aggregator; this module holds the data shapes, derived values, and the
//! re-aggregation of fine bars into coarser timeframes.

use crate::market::Trade;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Buy/sell ledger for one price level of a bar
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintLevel {
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub trade_count: u64,
}

impl FootprintLevel {
    pub fn total_volume(&self) -> Decimal {
        self.buy_volume + self.sell_volume
    }

    pub fn delta(&self) -> Decimal {
        self.buy_volume - self.sell_volume
    }
}

/// A candle with per-price-level buy/sell volume
#[derive(Debug, Clone, PartialEq)]
pub struct FootprintBar {
    pub symbol: String,
    pub timeframe: String,
    /// Bar start, aligned to the timeframe
    pub open_time: i64,
    /// Price level -> ledger, ascending by price
    pub levels: BTreeMap<Decimal, FootprintLevel>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub first_trade_ts: Option<i64>,
    pub last_trade_ts: Option<i64>,
}

impl FootprintBar {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>, open_time: i64) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            open_time,
            levels: BTreeMap::new(),
            open: None,
            high: None,
            low: None,
            close: None,
            first_trade_ts: None,
            last_trade_ts: None,
        }
    }

    /// Record one trade at an already tick-rounded price level
    pub fn apply_trade(&mut self, price_level: Decimal, trade: &Trade) {
        let level = self.levels.entry(price_level).or_default();
        level.trade_count += 1;
        if trade.is_buyer_maker {
            level.sell_volume += trade.quantity;
        } else {
            level.buy_volume += trade.quantity;
        }

        if self.open.is_none() {
            self.open = Some(trade.price);
            self.first_trade_ts = Some(trade.timestamp);
        }
        self.close = Some(trade.price);
        self.last_trade_ts = Some(trade.timestamp);
        self.high = Some(self.high.map_or(trade.price, |h| h.max(trade.price)));
        self.low = Some(self.low.map_or(trade.price, |l| l.min(trade.price)));
    }

    pub fn total_buy_volume(&self) -> Decimal {
        self.levels.values().map(|l| l.buy_volume).sum()
    }

    pub fn total_sell_volume(&self) -> Decimal {
        self.levels.values().map(|l| l.sell_volume).sum()
    }

    pub fn total_volume(&self) -> Decimal {
        self.total_buy_volume() + self.total_sell_volume()
    }

    pub fn delta(&self) -> Decimal {
        self.total_buy_volume() - self.total_sell_volume()
    }

    pub fn trade_count(&self) -> u64 {
        self.levels.values().map(|l| l.trade_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Price level with the greatest total volume (tie: lowest price)
    pub fn poc_price(&self) -> Option<Decimal> {
        self.levels
            .iter()
            .max_by(|(pa, la), (pb, lb)| {
                la.total_volume()
                    .cmp(&lb.total_volume())
                    // On equal volume prefer the LOWER price, so it must
                    // win the max comparison
                    .then_with(|| pb.cmp(pa))
            })
            .map(|(price, _)| *price)
    }

    /// Price level with the greatest delta
    pub fn max_delta_price(&self) -> Option<Decimal> {
        self.levels
            .iter()
            .max_by(|(pa, la), (pb, lb)| la.delta().cmp(&lb.delta()).then_with(|| pb.cmp(pa)))
            .map(|(price, _)| *price)
    }

    /// Price level with the smallest delta
    pub fn min_delta_price(&self) -> Option<Decimal> {
        self.levels
            .iter()
            .min_by(|(pa, la), (pb, lb)| la.delta().cmp(&lb.delta()).then_with(|| pa.cmp(pb)))
            .map(|(price, _)| *price)
    }

    /// Serializable document for tool responses
    pub fn to_doc(&self) -> FootprintBarDoc {
        FootprintBarDoc {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            buy_volume: self.total_buy_volume(),
            sell_volume: self.total_sell_volume(),
            total_volume: self.total_volume(),
            delta: self.delta(),
            trade_count: self.trade_count(),
            poc_price: self.poc_price(),
            max_delta_price: self.max_delta_price(),
            min_delta_price: self.min_delta_price(),
            levels: self
                .levels
                .iter()
                .map(|(price, level)| FootprintLevelDoc {
                    price: *price,
                    buy_volume: level.buy_volume,
                    sell_volume: level.sell_volume,
                    total_volume: level.total_volume(),
                    delta: level.delta(),
                    trade_count: level.trade_count,
                })
                .collect(),
        }
    }
}

/// Flattened level row in a bar document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintLevelDoc {
    pub price: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub total_volume: Decimal,
    pub delta: Decimal,
    pub trade_count: u64,
}

/// Serialized footprint bar with derived values precomputed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintBarDoc {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: i64,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub total_volume: Decimal,
    pub delta: Decimal,
    pub trade_count: u64,
    pub poc_price: Option<Decimal>,
    pub max_delta_price: Option<Decimal>,
    pub min_delta_price: Option<Decimal>,
    pub levels: Vec<FootprintLevelDoc>,
}

/// Merge fine-grained bars into a coarser timeframe
///
/// Levels are summed per price; OHLC recomposes from the source bars in
/// time order. The inputs are assumed to be aligned sub-bars of the target
/// timeframe (e.g. 1m bars into 5m).
pub fn aggregate_bars(
    bars: &[FootprintBar],
    target_timeframe: &str,
    target_tf_ms: i64,
) -> Vec<FootprintBar> {
    let mut grouped: BTreeMap<i64, FootprintBar> = BTreeMap::new();

    let mut ordered: Vec<&FootprintBar> = bars.iter().collect();
    ordered.sort_by_key(|b| b.open_time);

    for bar in ordered {
        let bucket_start = (bar.open_time / target_tf_ms) * target_tf_ms;
        let target = grouped.entry(bucket_start).or_insert_with(|| {
            FootprintBar::new(bar.symbol.clone(), target_timeframe, bucket_start)
        });

        for (price, level) in &bar.levels {
            let slot = target.levels.entry(*price).or_default();
            slot.buy_volume += level.buy_volume;
            slot.sell_volume += level.sell_volume;
            slot.trade_count += level.trade_count;
        }

        if target.open.is_none() {
            target.open = bar.open;
            target.first_trade_ts = bar.first_trade_ts;
        }
        if bar.close.is_some() {
            target.close = bar.close;
            target.last_trade_ts = bar.last_trade_ts;
        }
        target.high = match (target.high, bar.high) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        target.low = match (target.low, bar.low) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    grouped.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_apply_trade_updates_levels_and_ohlc() {
        let mut bar = FootprintBar::new("BTCUSDT", "1m", 0);
        bar.apply_trade(dec("50000"), &trade("50000.3", "1.0", false, 10));
        bar.apply_trade(dec("50000"), &trade("50000.1", "0.5", true, 20));
        bar.apply_trade(dec("49990"), &trade("49990.0", "2.0", true, 30));

        let level = &bar.levels[&dec("50000")];
        assert_eq!(level.buy_volume, dec("1.0"));
        assert_eq!(level.sell_volume, dec("0.5"));
        assert_eq!(level.trade_count, 2);

        assert_eq!(bar.open, Some(dec("50000.3")));
        assert_eq!(bar.close, Some(dec("49990.0")));
        assert_eq!(bar.high, Some(dec("50000.3")));
        assert_eq!(bar.low, Some(dec("49990.0")));
        assert_eq!(bar.first_trade_ts, Some(10));
        assert_eq!(bar.last_trade_ts, Some(30));
    }

    #[test]
    fn test_totals_and_delta_identity() {
        let mut bar = FootprintBar::new("BTCUSDT", "1m", 0);
        bar.apply_trade(dec("50000"), &trade("50000", "3.0", false, 1));
        bar.apply_trade(dec("50010"), &trade("50010", "1.0", true, 2));

        assert_eq!(bar.total_volume(), dec("4.0"));
        assert_eq!(bar.delta(), dec("2.0"));
        // totalVolume equals the sum over levels of buy+sell
        let sum: Decimal = bar.levels.values().map(|l| l.total_volume()).sum();
        assert_eq!(bar.total_volume(), sum);
        let delta_sum: Decimal = bar.levels.values().map(|l| l.delta()).sum();
        assert_eq!(bar.delta(), delta_sum);
    }

    #[test]
    fn test_poc_tie_breaks_to_lowest_price() {
        let mut bar = FootprintBar::new("BTCUSDT", "1m", 0);
        bar.apply_trade(dec("50000"), &trade("50000", "2.0", false, 1));
        bar.apply_trade(dec("50010"), &trade("50010", "2.0", false, 2));
        assert_eq!(bar.poc_price(), Some(dec("50000")));
    }

    #[test]
    fn test_empty_bar_derivations() {
        let bar = FootprintBar::new("BTCUSDT", "1m", 0);
        assert!(bar.poc_price().is_none());
        assert!(bar.max_delta_price().is_none());
        assert_eq!(bar.total_volume(), Decimal::ZERO);
    }

    #[test]
    fn test_aggregate_five_one_minute_bars() {
        // Five consecutive 1m bars with a single identical level
        let mut bars = Vec::new();
        for i in 0..5i64 {
            let mut bar = FootprintBar::new("BTCUSDT", "1m", i * 60_000);
            bar.apply_trade(dec("50000"), &trade("50000", "10", false, i * 60_000));
            bar.apply_trade(dec("50000"), &trade("50000", "5", true, i * 60_000 + 1));
            bars.push(bar);
        }

        let aggregated = aggregate_bars(&bars, "5m", 300_000);
        assert_eq!(aggregated.len(), 1);
        let five = &aggregated[0];
        assert_eq!(five.open_time, 0);

        let level = &five.levels[&dec("50000")];
        assert_eq!(level.buy_volume, dec("50"));
        assert_eq!(level.sell_volume, dec("25"));
        assert_eq!(five.delta(), dec("25"));
        assert_eq!(five.total_volume(), dec("75"));
    }
}
