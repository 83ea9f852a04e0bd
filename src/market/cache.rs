//! Live mark-price cache
//!
//! Holds the most recent mark-price event per symbol so tool reads never
//! touch the network for data the stream already delivers once a second.

use crate::binance::types::MarkPriceEvent;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

/// Latest mark/index price and funding state for one symbol
#[derive(Debug, Clone, Serialize)]
pub struct MarkPriceInfo {
    pub symbol: String,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub funding_rate: Decimal,
    pub next_funding_time: i64,
    /// Event time of the update that produced this entry
    pub updated_at: i64,
}

/// Per-symbol cache of the latest mark price, written by the dispatcher
#[derive(Debug, Default)]
pub struct MarkPriceCache {
    entries: RwLock<HashMap<String, MarkPriceInfo>>,
}

impl MarkPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a mark-price event; unparseable fields drop the event
    pub async fn update(&self, event: &MarkPriceEvent) {
        let (mark, index, funding) = match (
            Decimal::from_str(&event.mark_price),
            Decimal::from_str(&event.index_price),
            Decimal::from_str(&event.funding_rate),
        ) {
            (Ok(m), Ok(i), Ok(f)) => (m, i, f),
            _ => {
                tracing::warn!(symbol = %event.symbol, "Dropping unparseable mark price event");
                return;
            }
        };

        let info = MarkPriceInfo {
            symbol: event.symbol.to_uppercase(),
            mark_price: mark,
            index_price: index,
            funding_rate: funding,
            next_funding_time: event.next_funding_time,
            updated_at: event.event_time,
        };

        self.entries
            .write()
            .await
            .insert(info.symbol.clone(), info);
    }

    pub async fn get(&self, symbol: &str) -> Option<MarkPriceInfo> {
        self.entries.read().await.get(&symbol.to_uppercase()).cloned()
    }
}
