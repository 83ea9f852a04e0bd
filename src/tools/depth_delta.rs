//! get_orderbook_depth_delta tool
//!
//! Current sampled depth, recent snapshot and delta history, and the
//! aggregate summary. The "current" view is the most recent *sampled*
//! snapshot, never a fresh computation, so it always matches the tail of
//! the history.

use crate::error::Result;
use crate::supervisor::AppContext;
use crate::util::time::now_ms;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_LOOKBACK: usize = 100;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DepthDeltaArgs {
    /// Trading pair symbol, e.g. BTCUSDT
    pub symbol: String,
    /// Percent band around mid (informational; sampling uses the
    /// configured band)
    #[serde(default)]
    pub percent: Option<f64>,
    /// Sampling interval in seconds (informational; sampling cadence is
    /// configured at startup)
    #[serde(rename = "windowSec", default)]
    pub window_sec: Option<u64>,
    /// Number of history entries returned
    #[serde(default)]
    pub lookback: Option<usize>,
}

pub async fn run(ctx: &AppContext, args: DepthDeltaArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    let lookback = args.lookback.unwrap_or(DEFAULT_LOOKBACK);

    let current = ctx.depth_tracker.latest(&symbol).await;
    let history = ctx.depth_tracker.recent_snapshots(&symbol, lookback).await;
    let deltas = ctx.depth_tracker.recent_deltas(&symbol, lookback).await;
    let summary = ctx.depth_tracker.summary(&symbol, lookback).await;

    Ok(json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timestamp": now_ms(),
        "percentRange": ctx.settings.orderbook_depth_percent,
        "windowSec": ctx.settings.depth_snapshot_interval.as_secs(),
        "requestedPercent": args.percent,
        "requestedWindowSec": args.window_sec,
        "synced": ctx.orderbooks.is_synced(&symbol).await,
        "currentDepth": current,
        "historyCount": history.len(),
        "depthHistory": history,
        "deltaCount": deltas.len(),
        "deltaHistory": deltas,
        "summary": summary,
    }))
}
