//! Canonical in-memory market records
//!
//! Wire events are converted into these shapes exactly once, at the
//! dispatcher boundary. All prices and quantities are `Decimal`; conversion
//! rejects values that would corrupt downstream state (non-positive price,
//! negative quantity).

pub mod cache;
pub mod liquidations;

use crate::binance::types::{AggTradeEvent, ForceOrderDetail};
use crate::error::{OrderflowError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// A single aggregated trade
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub agg_trade_id: u64,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Trade time in milliseconds since the Unix epoch (UTC)
    pub timestamp: i64,
    /// True when the buyer was the resting order (taker sold)
    pub is_buyer_maker: bool,
}

impl Trade {
    /// Convert a wire event, validating integrity
    ///
    /// # Errors
    /// Rejects unparseable, non-positive prices and negative quantities so
    /// a single bad event cannot poison cumulative state.
    pub fn from_event(event: &AggTradeEvent) -> Result<Self> {
        let price = Decimal::from_str(&event.price)
            .map_err(|e| OrderflowError::Parse(format!("Invalid trade price: {}", e)))?;
        let quantity = Decimal::from_str(&event.quantity)
            .map_err(|e| OrderflowError::Parse(format!("Invalid trade quantity: {}", e)))?;

        if price <= Decimal::ZERO {
            return Err(OrderflowError::Integrity(format!(
                "Non-positive trade price: {}",
                price
            )));
        }
        if quantity < Decimal::ZERO {
            return Err(OrderflowError::Integrity(format!(
                "Negative trade quantity: {}",
                quantity
            )));
        }

        Ok(Self {
            agg_trade_id: event.agg_trade_id,
            symbol: event.symbol.to_uppercase(),
            price,
            quantity,
            timestamp: event.trade_time,
            is_buyer_maker: event.is_buyer_maker,
        })
    }

    /// Convert a REST aggTrades row (used for startup warmup)
    pub fn from_rest(symbol: &str, row: &crate::binance::types::RestAggTrade) -> Result<Self> {
        Self::from_event(&AggTradeEvent {
            event_type: "aggTrade".to_string(),
            event_time: row.timestamp,
            symbol: symbol.to_string(),
            agg_trade_id: row.agg_trade_id,
            price: row.price.clone(),
            quantity: row.quantity.clone(),
            first_trade_id: row.first_trade_id,
            last_trade_id: row.last_trade_id,
            trade_time: row.timestamp,
            is_buyer_maker: row.is_buyer_maker,
        })
    }

    /// Taker side: the buyer being the maker means the taker sold
    pub fn side(&self) -> Side {
        if self.is_buyer_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    pub fn buy_volume(&self) -> Decimal {
        match self.side() {
            Side::Buy => self.quantity,
            Side::Sell => Decimal::ZERO,
        }
    }

    pub fn sell_volume(&self) -> Decimal {
        self.quantity - self.buy_volume()
    }

    /// Signed volume: positive for taker buys, negative for taker sells
    pub fn signed_volume(&self) -> Decimal {
        match self.side() {
            Side::Buy => self.quantity,
            Side::Sell => -self.quantity,
        }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// A forced liquidation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liquidation {
    pub symbol: String,
    /// Execution side of the forced order: SELL closes a long, BUY a short
    pub side: String,
    pub price: Decimal,
    pub avg_price: Decimal,
    pub original_qty: Decimal,
    pub filled_qty: Decimal,
    pub timestamp: i64,
    pub order_status: String,
}

impl Liquidation {
    pub fn from_detail(detail: &ForceOrderDetail) -> Result<Self> {
        let price = Decimal::from_str(&detail.price)
            .map_err(|e| OrderflowError::Parse(format!("Invalid liquidation price: {}", e)))?;
        let avg_price = Decimal::from_str(&detail.avg_price).unwrap_or(Decimal::ZERO);
        let original_qty = Decimal::from_str(&detail.original_qty)
            .map_err(|e| OrderflowError::Parse(format!("Invalid liquidation qty: {}", e)))?;
        let filled_qty = Decimal::from_str(&detail.filled_qty).unwrap_or(Decimal::ZERO);

        if original_qty < Decimal::ZERO || filled_qty < Decimal::ZERO {
            return Err(OrderflowError::Integrity(
                "Negative liquidation quantity".to_string(),
            ));
        }

        Ok(Self {
            symbol: detail.symbol.to_uppercase(),
            side: detail.side.clone(),
            price,
            avg_price,
            original_qty,
            filled_qty,
            timestamp: detail.trade_time,
            order_status: detail.order_status.clone(),
        })
    }

    /// Executed notional; falls back to order price x original quantity
    /// when the average fill price is not reported
    pub fn notional(&self) -> Decimal {
        if self.avg_price > Decimal::ZERO {
            self.avg_price * self.filled_qty
        } else {
            self.price * self.original_qty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::types::AggTradeEvent;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn event(price: &str, qty: &str, buyer_maker: bool) -> AggTradeEvent {
        AggTradeEvent {
            event_type: "aggTrade".into(),
            event_time: 1,
            symbol: "btcusdt".into(),
            agg_trade_id: 1,
            price: price.into(),
            quantity: qty.into(),
            first_trade_id: 1,
            last_trade_id: 1,
            trade_time: 1,
            is_buyer_maker: buyer_maker,
        }
    }

    #[test]
    fn test_trade_sides_and_volumes() {
        let buy = Trade::from_event(&event("50000", "2", false)).unwrap();
        assert_eq!(buy.side(), Side::Buy);
        assert_eq!(buy.buy_volume(), dec("2"));
        assert_eq!(buy.sell_volume(), Decimal::ZERO);
        assert_eq!(buy.signed_volume(), dec("2"));

        let sell = Trade::from_event(&event("50000", "2", true)).unwrap();
        assert_eq!(sell.side(), Side::Sell);
        assert_eq!(sell.buy_volume(), Decimal::ZERO);
        assert_eq!(sell.sell_volume(), dec("2"));
        assert_eq!(sell.signed_volume(), dec("-2"));
    }

    #[test]
    fn test_buy_plus_sell_equals_quantity() {
        for maker in [true, false] {
            let t = Trade::from_event(&event("50000", "1.5", maker)).unwrap();
            assert_eq!(t.buy_volume() + t.sell_volume(), t.quantity);
            // Exactly one side is nonzero
            assert!(t.buy_volume().is_zero() ^ t.sell_volume().is_zero());
        }
    }

    #[test]
    fn test_trade_rejects_bad_values() {
        assert!(Trade::from_event(&event("0", "1", false)).is_err());
        assert!(Trade::from_event(&event("-5", "1", false)).is_err());
        assert!(Trade::from_event(&event("50000", "-1", false)).is_err());
        assert!(Trade::from_event(&event("garbage", "1", false)).is_err());
    }

    #[test]
    fn test_trade_symbol_uppercased() {
        let t = Trade::from_event(&event("50000", "1", false)).unwrap();
        assert_eq!(t.symbol, "BTCUSDT");
    }

    #[test]
    fn test_liquidation_notional_prefers_avg_price() {
        let liq = Liquidation {
            symbol: "BTCUSDT".into(),
            side: "SELL".into(),
            price: dec("49000"),
            avg_price: dec("49050"),
            original_qty: dec("0.02"),
            filled_qty: dec("0.014"),
            timestamp: 1,
            order_status: "FILLED".into(),
        };
        assert_eq!(liq.notional(), dec("49050") * dec("0.014"));

        let no_avg = Liquidation {
            avg_price: Decimal::ZERO,
            ..liq
        };
        assert_eq!(no_avg.notional(), dec("49000") * dec("0.02"));
    }
}
