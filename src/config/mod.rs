//! Configuration management
//!
//! All settings load from environment variables with defaults matching the
//! production deployment. Invalid values (unknown timeframe, malformed
//! session window) fail fast at startup instead of surfacing later inside
//! the stream pipeline.

use crate::error::{OrderflowError, Result};
use crate::util::time::timeframe_ms;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// Timeframes tracked by the trade aggregator and delta engine
pub const TRACKED_TIMEFRAMES: [&str; 5] = ["1m", "5m", "15m", "30m", "1h"];

/// A UTC session window parsed from `"HH:MM-HH:MM"`
///
/// Stored as half-open minute-of-day bounds `[start, end)`. Windows may
/// overlap (London opens while Tokyo is still trading); a trade inside two
/// windows updates both sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub start_minutes: i64,
    pub end_minutes: i64,
}

impl SessionWindow {
    pub fn parse(spec: &str) -> Result<Self> {
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| OrderflowError::Config(format!("Invalid session window: {}", spec)))?;

        Ok(Self {
            start_minutes: parse_hhmm(start)?,
            end_minutes: parse_hhmm(end)?,
        })
    }

    /// Whether a minute-of-day falls inside the half-open window
    pub fn contains(&self, minute_of_day: i64) -> bool {
        minute_of_day >= self.start_minutes && minute_of_day < self.end_minutes
    }

    /// Absolute `[start, end)` bounds for the window on a given UTC day
    pub fn bounds_for_day(&self, day_start: i64) -> (i64, i64) {
        (
            day_start + self.start_minutes * 60_000,
            day_start + self.end_minutes * 60_000,
        )
    }
}

fn parse_hhmm(s: &str) -> Result<i64> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| OrderflowError::Config(format!("Invalid session time: {}", s)))?;
    let hours: i64 = h
        .parse()
        .map_err(|_| OrderflowError::Config(format!("Invalid session hour: {}", s)))?;
    let minutes: i64 = m
        .parse()
        .map_err(|_| OrderflowError::Config(format!("Invalid session minute: {}", s)))?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(OrderflowError::Config(format!(
            "Session time out of range: {}",
            s
        )));
    }
    Ok(hours * 60 + minutes)
}

/// Application settings loaded from environment variables
#[derive(Debug, Clone)]
pub struct Settings {
    // Server
    pub http_host: String,
    pub http_port: u16,

    // Binance endpoints (USD-M futures)
    pub binance_rest_url: String,
    pub binance_ws_url: String,

    // Symbols
    pub symbols: Vec<String>,
    pub tick_size_btc: Decimal,
    pub tick_size_eth: Decimal,
    pub tick_size_default: Decimal,

    // Database
    pub cache_db_path: String,
    pub data_retention_days: i64,

    // Session windows (UTC)
    pub tokyo_session: SessionWindow,
    pub london_session: SessionWindow,
    pub ny_session: SessionWindow,

    // Orderflow
    pub value_area_percent: Decimal,
    pub imbalance_ratio_threshold: Decimal,
    pub imbalance_consecutive_levels: usize,
    pub cvd_reset_on_rollover: bool,

    // Orderbook
    pub orderbook_depth_percent: Decimal,
    pub depth_snapshot_interval: Duration,
    pub orderbook_snapshot_limit: u32,
    pub orderbook_resync_interval: Duration,

    // Liquidations
    pub liquidation_cache_size: usize,

    // Rate limiting / reconnect
    pub rest_rate_limit_per_min: u32,
    pub ws_reconnect_delay: Duration,
    pub ws_max_reconnect_attempts: u32,
}

impl Settings {
    /// Load settings from the environment, applying defaults
    ///
    /// # Errors
    /// Returns a configuration error for malformed values; the process
    /// should not start with a partially valid configuration.
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            http_host: env_or("MCP_HOST", "0.0.0.0"),
            http_port: env_parse("MCP_PORT", 8022)?,
            binance_rest_url: env_or("BINANCE_REST_URL", "https://fapi.binance.com"),
            binance_ws_url: env_or("BINANCE_WS_URL", "wss://fstream.binance.com"),
            symbols: env_or("SYMBOLS", "BTCUSDT,ETHUSDT")
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            tick_size_btc: env_decimal("FOOTPRINT_TICK_SIZE_BTC", "0.1")?,
            tick_size_eth: env_decimal("FOOTPRINT_TICK_SIZE_ETH", "0.01")?,
            tick_size_default: env_decimal("FOOTPRINT_TICK_SIZE_DEFAULT", "0.1")?,
            cache_db_path: env_or("CACHE_DB_PATH", "./data/orderflow_cache.db"),
            data_retention_days: env_parse("DATA_RETENTION_DAYS", 7)?,
            tokyo_session: SessionWindow::parse(&env_or("TOKYO_SESSION", "00:00-09:00"))?,
            london_session: SessionWindow::parse(&env_or("LONDON_SESSION", "07:00-16:00"))?,
            ny_session: SessionWindow::parse(&env_or("NY_SESSION", "13:00-22:00"))?,
            value_area_percent: env_decimal("VALUE_AREA_PERCENT", "70")?,
            imbalance_ratio_threshold: env_decimal("IMBALANCE_RATIO_THRESHOLD", "3.0")?,
            imbalance_consecutive_levels: env_parse("IMBALANCE_CONSECUTIVE_LEVELS", 3)?,
            cvd_reset_on_rollover: env_or("CVD_RESET_ON_ROLLOVER", "false")
                .eq_ignore_ascii_case("true"),
            orderbook_depth_percent: env_decimal("ORDERBOOK_DEPTH_PERCENT", "1.0")?,
            depth_snapshot_interval: Duration::from_secs(env_parse(
                "ORDERBOOK_UPDATE_INTERVAL_SEC",
                5,
            )?),
            orderbook_snapshot_limit: env_parse("ORDERBOOK_SNAPSHOT_LIMIT", 1000)?,
            orderbook_resync_interval: Duration::from_secs(env_parse(
                "ORDERBOOK_RESYNC_INTERVAL_SEC",
                1800,
            )?),
            liquidation_cache_size: env_parse("LIQUIDATION_CACHE_SIZE", 1000)?,
            rest_rate_limit_per_min: env_parse("REST_RATE_LIMIT_PER_MIN", 1200)?,
            ws_reconnect_delay: Duration::from_secs(env_parse("WS_RECONNECT_DELAY_SEC", 5)?),
            ws_max_reconnect_attempts: env_parse("WS_MAX_RECONNECT_ATTEMPTS", 10)?,
        };

        if settings.symbols.is_empty() {
            return Err(OrderflowError::Config("SYMBOLS must not be empty".into()));
        }

        // Validate the tracked timeframe table once at startup
        for tf in TRACKED_TIMEFRAMES {
            timeframe_ms(tf)?;
        }

        Ok(settings)
    }

    /// Tick size used for footprint / volume-profile bucketing of a symbol
    pub fn tick_size(&self, symbol: &str) -> Decimal {
        let symbol = symbol.to_uppercase();
        if symbol.contains("BTC") {
            self.tick_size_btc
        } else if symbol.contains("ETH") {
            self.tick_size_eth
        } else {
            self.tick_size_default
        }
    }

    /// Named session windows in presentation order
    pub fn sessions(&self) -> [(&'static str, SessionWindow); 3] {
        [
            ("tokyo", self.tokyo_session),
            ("london", self.london_session),
            ("ny", self.ny_session),
        ]
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| OrderflowError::Config(format!("Invalid value for {}: {}", key, v))),
        Err(_) => Ok(default),
    }
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env_or(key, default);
    Decimal::from_str(&raw)
        .map_err(|_| OrderflowError::Config(format!("Invalid decimal for {}: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_window_parse() {
        let w = SessionWindow::parse("07:00-16:00").unwrap();
        assert_eq!(w.start_minutes, 7 * 60);
        assert_eq!(w.end_minutes, 16 * 60);
        assert!(w.contains(7 * 60));
        assert!(w.contains(15 * 60 + 59));
        assert!(!w.contains(16 * 60)); // half-open
        assert!(!w.contains(6 * 60 + 59));
    }

    #[test]
    fn test_session_window_rejects_garbage() {
        assert!(SessionWindow::parse("0700-1600").is_err());
        assert!(SessionWindow::parse("25:00-26:00").is_err());
        assert!(SessionWindow::parse("07:00").is_err());
    }

    #[test]
    fn test_session_bounds_for_day() {
        let w = SessionWindow::parse("13:00-22:00").unwrap();
        let day = 1_672_531_200_000;
        let (start, end) = w.bounds_for_day(day);
        assert_eq!(start, day + 13 * 3_600_000);
        assert_eq!(end, day + 22 * 3_600_000);
    }

    #[test]
    fn test_tick_size_lookup() {
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.tick_size("BTCUSDT"), settings.tick_size_btc);
        assert_eq!(settings.tick_size("ethusdt"), settings.tick_size_eth);
        assert_eq!(settings.tick_size("SOLUSDT"), settings.tick_size_default);
    }
}
