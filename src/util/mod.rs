//! Shared utilities
//!
//! Millisecond time arithmetic and tick-grid rounding used across the
//! indicator engines.

pub mod time;

pub use time::{
    align_to_timeframe, day_start_ms, minutes_of_day, now_ms, timeframe_ms, MS_PER_DAY,
};

use rust_decimal::Decimal;

/// Round a price down onto the symbol's tick grid: `floor(price / tick) * tick`
///
/// All footprint and volume-profile bucketing goes through this so that the
/// same trade always lands in the same bucket regardless of which engine
/// observes it.
pub fn round_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    (price / tick_size).floor() * tick_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_to_tick_down() {
        assert_eq!(round_to_tick(dec("50000.07"), dec("0.1")), dec("50000.0"));
        assert_eq!(round_to_tick(dec("50000.19"), dec("0.1")), dec("50000.1"));
        assert_eq!(round_to_tick(dec("1999.999"), dec("0.01")), dec("1999.99"));
    }

    #[test]
    fn test_round_to_tick_zero_tick_passthrough() {
        assert_eq!(round_to_tick(dec("42.5"), Decimal::ZERO), dec("42.5"));
    }
}
