//! get_open_interest tool
//!
//! Current open interest plus history over a period, with the change
//! across the window.

use crate::error::Result;
use crate::supervisor::AppContext;
use crate::util::time::now_ms;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

const DEFAULT_PERIOD: &str = "1h";
const DEFAULT_LIMIT: u32 = 30;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenInterestArgs {
    /// Trading pair symbol, e.g. BTCUSDT
    pub symbol: String,
    /// History period: 5m, 15m, 30m, 1h, 2h, 4h, 6h, 12h or 1d
    #[serde(default)]
    pub period: Option<String>,
    /// Number of history entries
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn run(ctx: &AppContext, args: OpenInterestArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    let period = args.period.unwrap_or_else(|| DEFAULT_PERIOD.to_string());
    let limit = args.limit.unwrap_or(DEFAULT_LIMIT);

    let current = ctx.rest.get_open_interest(&symbol).await?;

    let history = match ctx.rest.get_open_interest_hist(&symbol, &period, limit).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "OI history fetch failed");
            Vec::new()
        }
    };

    // Change across the history window (oldest entry first in the response)
    let period_delta = match (history.first(), history.last()) {
        (Some(first), Some(last)) if history.len() > 1 => {
            let start = Decimal::from_str(&first.sum_open_interest).unwrap_or(Decimal::ZERO);
            let end = Decimal::from_str(&last.sum_open_interest).unwrap_or(Decimal::ZERO);
            Some(end - start)
        }
        _ => None,
    };

    let mark = ctx.mark_prices.get(&symbol).await;
    let oi_value = match (&mark, Decimal::from_str(&current.open_interest)) {
        (Some(info), Ok(oi)) => Some(info.mark_price * oi),
        _ => None,
    };

    Ok(json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timestamp": now_ms(),
        "openInterest": current.open_interest,
        "openInterestTime": current.time,
        "openInterestValue": oi_value,
        "period": period,
        "periodDelta": period_delta,
        "historyCount": history.len(),
        "history": history,
    }))
}
