//! Binance USD-M futures integration
//!
//! REST client for snapshots and reference data, WebSocket client for the
//! combined market-data stream, and the wire types shared between them.

pub mod client;
pub mod types;
pub mod websocket;

pub use client::FuturesRestClient;
pub use websocket::{MarketEvent, MarketStream};
