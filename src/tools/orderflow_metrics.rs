//! get_orderflow_metrics tool
//!
//! Delta sequence and CVD over a bar window, the divergence probe, and
//! stacked-imbalance analysis of the latest completed footprint bar.

use crate::error::Result;
use crate::indicators::delta::detect_divergence;
use crate::market::Side;
use crate::supervisor::AppContext;
use crate::util::time::{now_ms, timeframe_ms};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_LIMIT: usize = 100;
const DIVERGENCE_LOOKBACK: usize = 20;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OrderflowMetricsArgs {
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
    /// Maximum number of bars in the sequences
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn run(ctx: &AppContext, args: OrderflowMetricsArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    timeframe_ms(&args.timeframe)?;
    let limit = args.limit.unwrap_or(DEFAULT_LIMIT);

    let bars = ctx
        .delta_cvd
        .bars(&symbol, &args.timeframe, args.start_time, args.end_time, limit)
        .await;

    // Delta and CVD sequences over the window (CVD anchored at zero)
    let mut running = Decimal::ZERO;
    let mut delta_sequence = Vec::with_capacity(bars.len());
    let mut cvd_sequence = Vec::with_capacity(bars.len());
    for bar in &bars {
        running += bar.delta();
        delta_sequence.push(json!({
            "openTime": bar.open_time,
            "delta": bar.delta(),
            "deltaPercent": bar.delta_percent(),
            "buyVolume": bar.buy_volume,
            "sellVolume": bar.sell_volume,
            "totalVolume": bar.total_volume(),
            "tradeCount": bar.trade_count,
        }));
        cvd_sequence.push(json!({
            "openTime": bar.open_time,
            "cvd": running,
        }));
    }

    let summary = ctx.delta_cvd.summary(&symbol, &args.timeframe, limit).await;
    let divergence = detect_divergence(&bars, DIVERGENCE_LOOKBACK);

    // Imbalance analysis of the latest completed footprint bar
    let imbalances = match ctx
        .aggregator
        .last_completed_bar(&symbol, &args.timeframe)
        .await
    {
        Some(bar) => {
            let stacks = ctx.imbalance.find_stacked(&bar);
            let buy_count = stacks.iter().filter(|s| s.direction == Side::Buy).count();
            let sell_count = stacks.len() - buy_count;
            json!({
                "barOpenTime": bar.open_time,
                "config": {
                    "ratioThreshold": ctx.imbalance.ratio_threshold,
                    "minConsecutive": ctx.imbalance.min_consecutive,
                },
                "buyStacks": buy_count,
                "sellStacks": sell_count,
                "stacked": stacks,
            })
        }
        None => Value::Null,
    };

    Ok(json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timeframe": args.timeframe,
        "timestamp": now_ms(),
        "barCount": bars.len(),
        "deltaSequence": delta_sequence,
        "cvdSequence": cvd_sequence,
        "currentCVD": summary.current_cvd,
        "summary": summary,
        "divergence": divergence,
        "imbalances": imbalances,
    }))
}
