//! get_footprint tool
//!
//! Footprint bars for a time range. Completed bars come from the
//! persisted 1m rows (re-aggregated when a coarser timeframe is asked
//! for); the developing bar from the aggregator replaces its period so
//! live trades are included exactly once.

use crate::error::{OrderflowError, Result};
use crate::indicators::footprint::{aggregate_bars, FootprintBar, FootprintBarDoc};
use crate::storage::FootprintRow;
use crate::supervisor::AppContext;
use crate::util::time::{now_ms, timeframe_ms};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FootprintArgs {
    /// Trading pair symbol, e.g. BTCUSDT
    pub symbol: String,
    /// Bar timeframe: 1m, 5m, 15m, 30m or 1h
    pub timeframe: String,
    /// Range start (milliseconds since epoch, inclusive)
    #[serde(rename = "startTime", default)]
    pub start_time: Option<i64>,
    /// Range end (milliseconds since epoch, exclusive)
    #[serde(rename = "endTime", default)]
    pub end_time: Option<i64>,
    /// Maximum number of bars returned (newest kept)
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Reassemble 1m bars from persisted level rows
fn bars_from_rows(symbol: &str, rows: Vec<FootprintRow>) -> Vec<FootprintBar> {
    let mut grouped: BTreeMap<i64, FootprintBar> = BTreeMap::new();

    for row in rows {
        let bar = grouped
            .entry(row.timestamp)
            .or_insert_with(|| FootprintBar::new(symbol.to_string(), "1m", row.timestamp));
        let level = bar.levels.entry(row.price_level).or_default();
        level.buy_volume += row.buy_volume;
        level.sell_volume += row.sell_volume;
        level.trade_count += row.trade_count;
    }

    // Persisted rows carry no OHLC; recover the price span from the levels
    for bar in grouped.values_mut() {
        bar.high = bar.levels.keys().next_back().copied();
        bar.low = bar.levels.keys().next().copied();
    }

    grouped.into_values().collect()
}

pub async fn run(ctx: &AppContext, args: FootprintArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    let tf_ms = timeframe_ms(&args.timeframe)?;
    let limit = args.limit.unwrap_or(DEFAULT_LIMIT);

    let end_time = args.end_time.unwrap_or_else(now_ms);
    let start_time = args.start_time.unwrap_or(end_time - 100 * tf_ms);
    if start_time >= end_time {
        return Err(OrderflowError::InvalidRequest(format!(
            "startTime {} must be before endTime {}",
            start_time, end_time
        )));
    }

    let rows = ctx.store.footprint_range(&symbol, start_time, end_time)?;
    let one_min = bars_from_rows(&symbol, rows);

    let mut bars = if args.timeframe == "1m" {
        one_min
    } else {
        aggregate_bars(&one_min, &args.timeframe, tf_ms)
    };

    // The developing bar supersedes whatever the store has for its period
    if let Some(current) = ctx.aggregator.current_bar(&symbol, &args.timeframe).await {
        if !current.is_empty() && current.open_time >= start_time && current.open_time < end_time {
            match bars.iter_mut().find(|b| b.open_time == current.open_time) {
                Some(slot) => *slot = current,
                None => bars.push(current),
            }
        }
    }

    bars.sort_by_key(|b| b.open_time);
    if bars.len() > limit {
        bars.drain(..bars.len() - limit);
    }

    let docs: Vec<FootprintBarDoc> = bars.iter().map(|b| b.to_doc()).collect();

    Ok(json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timeframe": args.timeframe,
        "startTime": start_time,
        "endTime": end_time,
        "timestamp": now_ms(),
        "barCount": docs.len(),
        "bars": docs,
    }))
}
