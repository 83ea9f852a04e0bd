//! Trade aggregator
//!
//! Owns the footprint bars for every `(symbol, timeframe)` pair and fans
//! each trade out to the registered indicator engines. A trade is observed
//! exactly once per engine regardless of how many timeframes it lands in.

use crate::config::{Settings, TRACKED_TIMEFRAMES};
use crate::indicators::footprint::FootprintBar;
use crate::indicators::TradeSink;
use crate::market::Trade;
use crate::storage::{StoreMessage, StoreWriter};
use crate::util::round_to_tick;
use crate::util::time::{align_to_timeframe, timeframe_ms};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Completed bars retained in memory per (symbol, timeframe)
const COMPLETED_RING_SIZE: usize = 500;

struct TimeframeBars {
    current: FootprintBar,
    completed: VecDeque<FootprintBar>,
}

#[derive(Default)]
struct SymbolBars {
    by_timeframe: HashMap<&'static str, TimeframeBars>,
}

/// Per-symbol bucketed footprint bars plus the engine fan-out
pub struct TradeAggregator {
    settings: Arc<Settings>,
    /// (timeframe, duration ms), validated at startup
    timeframes: Vec<(&'static str, i64)>,
    states: RwLock<HashMap<String, SymbolBars>>,
    sinks: Vec<Arc<dyn TradeSink>>,
    writer: StoreWriter,
}

impl TradeAggregator {
    pub fn new(
        settings: Arc<Settings>,
        sinks: Vec<Arc<dyn TradeSink>>,
        writer: StoreWriter,
    ) -> Self {
        let timeframes = TRACKED_TIMEFRAMES
            .iter()
            .map(|tf| {
                let ms = timeframe_ms(tf).expect("tracked timeframes validated at startup");
                (*tf, ms)
            })
            .collect();

        Self {
            settings,
            timeframes,
            states: RwLock::new(HashMap::new()),
            sinks,
            writer,
        }
    }

    /// Consume one trade: bucket it into every tracked timeframe, then
    /// forward it to each registered engine exactly once
    pub async fn process_trade(&self, trade: &Trade) {
        let tick_size = self.settings.tick_size(&trade.symbol);
        let price_level = round_to_tick(trade.price, tick_size);

        {
            let mut states = self.states.write().await;
            let symbol_bars = states.entry(trade.symbol.clone()).or_default();

            for (timeframe, tf_ms) in &self.timeframes {
                let open_time = align_to_timeframe(trade.timestamp, *tf_ms);

                let slot = symbol_bars
                    .by_timeframe
                    .entry(*timeframe)
                    .or_insert_with(|| TimeframeBars {
                        current: FootprintBar::new(trade.symbol.clone(), *timeframe, open_time),
                        completed: VecDeque::new(),
                    });

                if slot.current.open_time != open_time {
                    let finished = std::mem::replace(
                        &mut slot.current,
                        FootprintBar::new(trade.symbol.clone(), *timeframe, open_time),
                    );
                    self.finalize_bar(slot, finished);
                }

                slot.current.apply_trade(price_level, trade);
            }
        }

        for sink in &self.sinks {
            sink.on_trade(trade).await;
        }
    }

    /// Move a finished bar into the completed ring, persisting 1m bars
    fn finalize_bar(&self, slot: &mut TimeframeBars, bar: FootprintBar) {
        if bar.is_empty() {
            return;
        }

        if bar.timeframe == "1m" {
            self.persist_bar(&bar);
        }

        tracing::debug!(
            symbol = %bar.symbol,
            timeframe = %bar.timeframe,
            open_time = bar.open_time,
            volume = %bar.total_volume(),
            "Footprint bar finalized"
        );

        if slot.completed.len() >= COMPLETED_RING_SIZE {
            slot.completed.pop_front();
        }
        slot.completed.push_back(bar);
    }

    fn persist_bar(&self, bar: &FootprintBar) {
        for (price, level) in &bar.levels {
            self.writer.send(StoreMessage::FootprintLevel {
                symbol: bar.symbol.clone(),
                timestamp: bar.open_time,
                price_level: *price,
                buy_volume: level.buy_volume,
                sell_volume: level.sell_volume,
                trade_count: level.trade_count,
            });
        }
    }

    /// Current (developing) bar for a symbol/timeframe
    pub async fn current_bar(&self, symbol: &str, timeframe: &str) -> Option<FootprintBar> {
        let states = self.states.read().await;
        states
            .get(&symbol.to_uppercase())?
            .by_timeframe
            .get(timeframe)
            .map(|slot| slot.current.clone())
    }

    /// Completed bars within `[start, end)`, oldest first, capped at `limit`
    pub async fn completed_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Vec<FootprintBar> {
        let states = self.states.read().await;
        let Some(slot) = states
            .get(&symbol.to_uppercase())
            .and_then(|s| s.by_timeframe.get(timeframe))
        else {
            return Vec::new();
        };

        let mut bars: Vec<FootprintBar> = slot
            .completed
            .iter()
            .filter(|bar| {
                start_time.map_or(true, |s| bar.open_time >= s)
                    && end_time.map_or(true, |e| bar.open_time < e)
            })
            .cloned()
            .collect();

        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        bars
    }

    /// Latest completed bar for a symbol/timeframe
    pub async fn last_completed_bar(&self, symbol: &str, timeframe: &str) -> Option<FootprintBar> {
        let states = self.states.read().await;
        states
            .get(&symbol.to_uppercase())?
            .by_timeframe
            .get(timeframe)
            .and_then(|slot| slot.completed.back().cloned())
    }

    /// Persist every outstanding in-memory 1m bar (graceful shutdown)
    pub async fn flush(&self) {
        let states = self.states.read().await;
        for symbol_bars in states.values() {
            if let Some(slot) = symbol_bars.by_timeframe.get("1m") {
                if !slot.current.is_empty() {
                    self.persist_bar(&slot.current);
                }
            }
        }
        tracing::info!("Outstanding footprint bars flushed");
    }
}
