//! Binance futures wire types
//!
//! Serde mappings for the REST payloads and WebSocket events the provider
//! consumes. Prices and quantities stay `String` at this layer; they are
//! parsed into `Decimal` exactly once when converted to canonical records.

use serde::{Deserialize, Serialize};

// ==================== WebSocket events ====================

/// Envelope of the combined stream: `{"stream": "...", "data": {...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    pub data: serde_json::Value,
}

/// Aggregated trade event from the `<symbol>@aggTrade` subtopic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggTradeEvent {
    /// Event type (always "aggTrade")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds since Unix epoch)
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Trading pair symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade ID
    #[serde(rename = "a")]
    pub agg_trade_id: u64,

    /// Price (string to preserve precision)
    #[serde(rename = "p")]
    pub price: String,

    /// Quantity (string to preserve precision)
    #[serde(rename = "q")]
    pub quantity: String,

    /// First trade ID
    #[serde(rename = "f", default)]
    pub first_trade_id: u64,

    /// Last trade ID
    #[serde(rename = "l", default)]
    pub last_trade_id: u64,

    /// Trade timestamp (milliseconds since Unix epoch)
    #[serde(rename = "T")]
    pub trade_time: i64,

    /// True when the buyer was the maker (taker sold)
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Depth diff event from the `<symbol>@depth@100ms` subtopic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthUpdateEvent {
    /// Event type (always "depthUpdate")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds since Unix epoch)
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Transaction time
    #[serde(rename = "T", default)]
    pub transaction_time: i64,

    /// Trading pair symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event (U)
    #[serde(rename = "U")]
    pub first_update_id: i64,

    /// Final update ID in event (u)
    #[serde(rename = "u")]
    pub final_update_id: i64,

    /// Final update ID of the previous event (pu) — the chaining key on
    /// futures streams
    #[serde(rename = "pu")]
    pub prev_final_update_id: i64,

    /// Bid updates [[price, qty], ...]; qty "0" removes the level
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,

    /// Ask updates [[price, qty], ...]
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

/// Mark price event from the `<symbol>@markPrice@1s` subtopic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPriceEvent {
    /// Event type (always "markPriceUpdate")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Trading pair symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Mark price
    #[serde(rename = "p")]
    pub mark_price: String,

    /// Index price
    #[serde(rename = "i")]
    pub index_price: String,

    /// Estimated settle price (only meaningful near settlement)
    #[serde(rename = "P", default)]
    pub estimated_settle_price: String,

    /// Current funding rate
    #[serde(rename = "r")]
    pub funding_rate: String,

    /// Next funding time (milliseconds)
    #[serde(rename = "T")]
    pub next_funding_time: i64,
}

/// Forced liquidation event from the `<symbol>@forceOrder` subtopic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceOrderEvent {
    /// Event type (always "forceOrder")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Liquidation order detail
    #[serde(rename = "o")]
    pub order: ForceOrderDetail,
}

/// Nested `o` object of a forceOrder event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceOrderDetail {
    /// Trading pair symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Side (BUY or SELL)
    #[serde(rename = "S")]
    pub side: String,

    /// Order type (LIMIT for liquidations)
    #[serde(rename = "o")]
    pub order_type: String,

    /// Time in force
    #[serde(rename = "f", default)]
    pub time_in_force: String,

    /// Original quantity
    #[serde(rename = "q")]
    pub original_qty: String,

    /// Order price
    #[serde(rename = "p")]
    pub price: String,

    /// Average fill price
    #[serde(rename = "ap")]
    pub avg_price: String,

    /// Order status (FILLED once fully liquidated)
    #[serde(rename = "X")]
    pub order_status: String,

    /// Last filled quantity
    #[serde(rename = "l", default)]
    pub last_filled_qty: String,

    /// Cumulative filled quantity
    #[serde(rename = "z")]
    pub filled_qty: String,

    /// Trade time (milliseconds)
    #[serde(rename = "T")]
    pub trade_time: i64,
}

// ==================== REST payloads ====================

/// Response from `GET /fapi/v1/depth`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshotResponse {
    pub last_update_id: i64,
    /// Message output time (futures snapshots carry E/T; absent on spot)
    #[serde(rename = "E", default)]
    pub event_time: i64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// Response from `GET /fapi/v1/ticker/24hr`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hrResponse {
    pub symbol: String,
    pub last_price: String,
    pub price_change: String,
    pub price_change_percent: String,
    pub weighted_avg_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    #[serde(default)]
    pub open_time: i64,
    #[serde(default)]
    pub close_time: i64,
}

/// Response from `GET /fapi/v1/premiumIndex`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndexResponse {
    pub symbol: String,
    pub mark_price: String,
    pub index_price: String,
    pub last_funding_rate: String,
    pub next_funding_time: i64,
    #[serde(default)]
    pub time: i64,
}

/// Response from `GET /fapi/v1/openInterest`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestResponse {
    pub symbol: String,
    pub open_interest: String,
    pub time: i64,
}

/// One row of `GET /futures/data/openInterestHist`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestHistEntry {
    pub symbol: String,
    pub sum_open_interest: String,
    pub sum_open_interest_value: String,
    pub timestamp: i64,
}

/// One row of `GET /fapi/v1/fundingRate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRateEntry {
    pub symbol: String,
    pub funding_rate: String,
    pub funding_time: i64,
}

/// One row of `GET /fapi/v1/aggTrades`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestAggTrade {
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    #[serde(rename = "T")]
    pub timestamp: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}
