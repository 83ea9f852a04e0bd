//! get_market_snapshot tool
//!
//! Composes the 24h ticker, mark/index price and funding, open interest,
//! best bid/ask and running CVD into one document. Individual sections
//! degrade to null on upstream failure instead of failing the whole call.

use crate::error::Result;
use crate::supervisor::AppContext;
use crate::util::time::now_ms;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MarketSnapshotArgs {
    /// Trading pair symbol, e.g. BTCUSDT
    pub symbol: String,
}

pub async fn run(ctx: &AppContext, args: MarketSnapshotArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    let mut doc = json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timestamp": now_ms(),
    });
    let out = doc.as_object_mut().expect("doc is an object");

    match ctx.rest.get_ticker_24hr(&symbol).await {
        Ok(ticker) => {
            out.insert("lastPrice".into(), json!(ticker.last_price));
            out.insert("priceChange".into(), json!(ticker.price_change));
            out.insert("priceChangePercent".into(), json!(ticker.price_change_percent));
            out.insert("highPrice24h".into(), json!(ticker.high_price));
            out.insert("lowPrice24h".into(), json!(ticker.low_price));
            out.insert("volume24h".into(), json!(ticker.volume));
            out.insert("quoteVolume24h".into(), json!(ticker.quote_volume));
            out.insert("weightedAvgPrice".into(), json!(ticker.weighted_avg_price));
        }
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Ticker fetch failed");
        }
    }

    // Prefer the streamed mark price; fall back to REST
    if let Some(info) = ctx.mark_prices.get(&symbol).await {
        out.insert("markPrice".into(), json!(info.mark_price));
        out.insert("indexPrice".into(), json!(info.index_price));
        out.insert("fundingRate".into(), json!(info.funding_rate));
        out.insert("nextFundingTime".into(), json!(info.next_funding_time));
    } else {
        match ctx.rest.get_premium_index(&symbol).await {
            Ok(premium) => {
                out.insert("markPrice".into(), json!(premium.mark_price));
                out.insert("indexPrice".into(), json!(premium.index_price));
                out.insert("fundingRate".into(), json!(premium.last_funding_rate));
                out.insert("nextFundingTime".into(), json!(premium.next_funding_time));
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Premium index fetch failed");
            }
        }
    }

    match ctx.rest.get_open_interest(&symbol).await {
        Ok(oi) => {
            out.insert("openInterest".into(), json!(oi.open_interest));
            out.insert("openInterestTime".into(), json!(oi.time));
        }
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Open interest fetch failed");
        }
    }

    if let Ok((bid, ask)) = ctx.orderbooks.best_bid_ask(&symbol).await {
        out.insert("bestBid".into(), json!(bid));
        out.insert("bestAsk".into(), json!(ask));
        out.insert("spread".into(), json!(ask - bid));
    }

    out.insert("cvd".into(), json!(ctx.delta_cvd.cvd(&symbol).await));

    Ok(doc)
}
