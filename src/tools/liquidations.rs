//! stream_liquidations tool
//!
//! Recent forced liquidations from the in-memory ring, supplemented from
//! the store when the ring holds fewer events than requested, plus
//! aggregate statistics.

use crate::error::Result;
use crate::market::liquidations::LiquidationStats;
use crate::market::Liquidation;
use crate::supervisor::AppContext;
use crate::util::time::now_ms;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LiquidationsArgs {
    /// Trading pair symbol, e.g. BTCUSDT
    pub symbol: String,
    /// Maximum number of events returned
    #[serde(default)]
    pub limit: Option<usize>,
    /// Filter by order side (BUY or SELL)
    #[serde(default)]
    pub side: Option<String>,
}

pub async fn run(ctx: &AppContext, args: LiquidationsArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    let limit = args.limit.unwrap_or(DEFAULT_LIMIT);
    let side = args.side.as_deref();

    let mut events = ctx.liquidations.recent(&symbol, limit, side).await;
    let cache_size = ctx.liquidations.len(&symbol).await;

    // Backfill from the store when the ring cannot satisfy the request
    if events.len() < limit {
        match ctx.store.liquidations(&symbol, limit, side) {
            Ok(stored) => {
                let seen: HashSet<(i64, String)> = events
                    .iter()
                    .map(|l| (l.timestamp, l.side.clone()))
                    .collect();
                let missing: Vec<Liquidation> = stored
                    .into_iter()
                    .filter(|l| !seen.contains(&(l.timestamp, l.side.clone())))
                    .collect();
                events.extend(missing);
                events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                events.truncate(limit);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Stored liquidations read failed");
            }
        }
    }

    let stats = LiquidationStats::compute(&events);

    Ok(json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timestamp": now_ms(),
        "requestedLimit": limit,
        "count": events.len(),
        "cacheSize": cache_size,
        "liquidations": events,
        "statistics": stats,
    }))
}
