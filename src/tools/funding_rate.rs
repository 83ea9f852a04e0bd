//! get_funding_rate tool
//!
//! Current funding rate and next funding time (streamed mark price when
//! available, REST otherwise) plus the recent funding history.

use crate::error::Result;
use crate::supervisor::AppContext;
use crate::util::time::now_ms;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_HISTORY_LIMIT: u32 = 30;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FundingRateArgs {
    /// Trading pair symbol, e.g. BTCUSDT
    pub symbol: String,
    /// Number of history entries
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn run(ctx: &AppContext, args: FundingRateArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    let limit = args.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let (funding_rate, next_funding_time, mark_price) =
        match ctx.mark_prices.get(&symbol).await {
            Some(info) => (
                json!(info.funding_rate),
                json!(info.next_funding_time),
                json!(info.mark_price),
            ),
            None => {
                let premium = ctx.rest.get_premium_index(&symbol).await?;
                (
                    json!(premium.last_funding_rate),
                    json!(premium.next_funding_time),
                    json!(premium.mark_price),
                )
            }
        };

    let history = match ctx.rest.get_funding_rate_history(&symbol, limit).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Funding history fetch failed");
            Vec::new()
        }
    };

    Ok(json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timestamp": now_ms(),
        "fundingRate": funding_rate,
        "nextFundingTime": next_funding_time,
        "markPrice": mark_price,
        "historyCount": history.len(),
        "history": history,
    }))
}
