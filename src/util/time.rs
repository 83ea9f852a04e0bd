//! UTC millisecond time arithmetic
//!
//! Timeframe alignment and UTC-day boundaries. Everything here is integer
//! math over milliseconds since the Unix epoch; no local timezones.

use crate::error::{OrderflowError, Result};

/// Milliseconds in one UTC day
pub const MS_PER_DAY: i64 = 86_400_000;

/// Current UTC timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert a timeframe string to its duration in milliseconds
///
/// Recognized timeframes: 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d.
/// Unknown timeframes are a configuration error and fail fast.
pub fn timeframe_ms(timeframe: &str) -> Result<i64> {
    let ms = match timeframe {
        "1m" => 60_000,
        "3m" => 3 * 60_000,
        "5m" => 5 * 60_000,
        "15m" => 15 * 60_000,
        "30m" => 30 * 60_000,
        "1h" => 3_600_000,
        "2h" => 2 * 3_600_000,
        "4h" => 4 * 3_600_000,
        "6h" => 6 * 3_600_000,
        "8h" => 8 * 3_600_000,
        "12h" => 12 * 3_600_000,
        "1d" => MS_PER_DAY,
        _ => {
            return Err(OrderflowError::Config(format!(
                "Unknown timeframe: {}",
                timeframe
            )))
        }
    };
    Ok(ms)
}

/// Align a timestamp down to the start of its timeframe period
pub fn align_to_timeframe(timestamp_ms: i64, tf_ms: i64) -> i64 {
    (timestamp_ms / tf_ms) * tf_ms
}

/// Start of the UTC day (00:00:00.000) containing the timestamp
pub fn day_start_ms(timestamp_ms: i64) -> i64 {
    (timestamp_ms / MS_PER_DAY) * MS_PER_DAY
}

/// Minute-of-day (0..1440) for a UTC timestamp, used for session windows
pub fn minutes_of_day(timestamp_ms: i64) -> i64 {
    (timestamp_ms % MS_PER_DAY) / 60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_ms_known() {
        assert_eq!(timeframe_ms("1m").unwrap(), 60_000);
        assert_eq!(timeframe_ms("5m").unwrap(), 300_000);
        assert_eq!(timeframe_ms("1h").unwrap(), 3_600_000);
        assert_eq!(timeframe_ms("1d").unwrap(), MS_PER_DAY);
    }

    #[test]
    fn test_timeframe_ms_unknown_fails() {
        assert!(timeframe_ms("7m").is_err());
        assert!(timeframe_ms("").is_err());
    }

    #[test]
    fn test_align_to_timeframe() {
        // 2023-01-01T00:01:30.500Z aligned to 1m -> 00:01:00.000
        let t = 1_672_531_290_500;
        assert_eq!(align_to_timeframe(t, 60_000), 1_672_531_260_000);
        // Already aligned timestamps are unchanged
        assert_eq!(align_to_timeframe(1_672_531_260_000, 60_000), 1_672_531_260_000);
    }

    #[test]
    fn test_day_start_and_minutes() {
        // 2023-01-01T07:30:00Z
        let t = 1_672_531_200_000 + 7 * 3_600_000 + 30 * 60_000;
        assert_eq!(day_start_ms(t), 1_672_531_200_000);
        assert_eq!(minutes_of_day(t), 7 * 60 + 30);
    }

    #[test]
    fn test_trade_at_day_boundary_belongs_to_new_day() {
        let boundary = 1_672_531_200_000; // exact midnight
        assert_eq!(day_start_ms(boundary), boundary);
        assert_eq!(day_start_ms(boundary - 1), boundary - MS_PER_DAY);
    }
}
