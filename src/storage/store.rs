//! SQLite store for orderflow aggregates
//!
//! Holds footprint rows, daily volume-profile rows, session levels, VWAP
//! accumulators, open-interest and depth snapshots, and liquidations.
//! Upserts use `ON CONFLICT` with additive semantics for volume columns so
//! replays of the same (symbol, timestamp, price) key accumulate instead of
//! duplicating.
//!
//! Volumes are stored as REAL; the in-memory engines keep exact decimals
//! and the store is a backstop, so the float boundary only affects
//! historical reads.

use crate::error::{OrderflowError, Result};
use crate::market::Liquidation;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS footprint_1m (
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    price_level REAL NOT NULL,
    buy_volume REAL NOT NULL DEFAULT 0,
    sell_volume REAL NOT NULL DEFAULT 0,
    trade_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(symbol, timestamp, price_level)
);

CREATE INDEX IF NOT EXISTS idx_footprint_symbol_time
    ON footprint_1m(symbol, timestamp);

CREATE TABLE IF NOT EXISTS daily_trades (
    symbol TEXT NOT NULL,
    date INTEGER NOT NULL,
    price_level REAL NOT NULL,
    volume REAL NOT NULL DEFAULT 0,
    buy_volume REAL NOT NULL DEFAULT 0,
    sell_volume REAL NOT NULL DEFAULT 0,
    notional REAL NOT NULL DEFAULT 0,
    trade_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(symbol, date, price_level)
);

CREATE INDEX IF NOT EXISTS idx_daily_trades_symbol_date
    ON daily_trades(symbol, date);

CREATE TABLE IF NOT EXISTS session_levels (
    symbol TEXT NOT NULL,
    date INTEGER NOT NULL,
    session TEXT NOT NULL,
    high REAL,
    low REAL,
    high_time INTEGER,
    low_time INTEGER,
    volume REAL NOT NULL DEFAULT 0,
    UNIQUE(symbol, date, session)
);

CREATE TABLE IF NOT EXISTS vwap_data (
    symbol TEXT NOT NULL,
    date INTEGER NOT NULL,
    cumulative_pv REAL NOT NULL DEFAULT 0,
    cumulative_v REAL NOT NULL DEFAULT 0,
    last_update INTEGER NOT NULL DEFAULT 0,
    UNIQUE(symbol, date)
);

CREATE TABLE IF NOT EXISTS oi_snapshots (
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    open_interest REAL NOT NULL,
    open_interest_value REAL
);

CREATE INDEX IF NOT EXISTS idx_oi_symbol_time
    ON oi_snapshots(symbol, timestamp);

CREATE TABLE IF NOT EXISTS depth_delta (
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    percent_range REAL NOT NULL,
    mid_price REAL NOT NULL,
    bid_volume REAL NOT NULL,
    ask_volume REAL NOT NULL,
    net_volume REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_depth_delta_symbol_time
    ON depth_delta(symbol, timestamp);

CREATE TABLE IF NOT EXISTS liquidations (
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    price REAL NOT NULL,
    avg_price REAL NOT NULL,
    original_qty REAL NOT NULL,
    filled_qty REAL NOT NULL,
    order_status TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_liquidations_symbol_time
    ON liquidations(symbol, timestamp);
"#;

/// One persisted 1m footprint row
#[derive(Debug, Clone)]
pub struct FootprintRow {
    pub timestamp: i64,
    pub price_level: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub trade_count: u64,
}

/// One persisted volume-profile row for a UTC day
#[derive(Debug, Clone)]
pub struct DailyTradeRow {
    pub price_level: Decimal,
    pub volume: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub notional: Decimal,
    pub trade_count: u64,
}

/// One persisted session-level row
#[derive(Debug, Clone)]
pub struct SessionLevelRow {
    pub session: String,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub high_time: Option<i64>,
    pub low_time: Option<i64>,
    pub volume: Decimal,
}

/// Persisted VWAP accumulators for a UTC day
#[derive(Debug, Clone)]
pub struct VwapRow {
    pub cumulative_pv: Decimal,
    pub cumulative_v: Decimal,
    pub last_update: i64,
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// SQLite-backed store shared by the writer task and the tool readers
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and initialize the schema
    pub fn open(db_path: &str) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OrderflowError::Storage(format!("mkdir {}: {}", db_path, e)))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .map_err(|e| OrderflowError::Storage(format!("open {}: {}", db_path, e)))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| OrderflowError::Storage(format!("schema: {}", e)))?;

        tracing::info!(path = %db_path, "SQLite store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| OrderflowError::Storage(format!("schema: {}", e)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ==================== writes ====================

    pub fn upsert_footprint_level(
        &self,
        symbol: &str,
        timestamp: i64,
        price_level: Decimal,
        buy_volume: Decimal,
        sell_volume: Decimal,
        trade_count: u64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO footprint_1m (symbol, timestamp, price_level, buy_volume, sell_volume, trade_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(symbol, timestamp, price_level) DO UPDATE SET
                buy_volume = footprint_1m.buy_volume + excluded.buy_volume,
                sell_volume = footprint_1m.sell_volume + excluded.sell_volume,
                trade_count = footprint_1m.trade_count + excluded.trade_count
            "#,
            params![
                symbol,
                timestamp,
                to_f64(price_level),
                to_f64(buy_volume),
                to_f64(sell_volume),
                trade_count as i64,
            ],
        )
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_daily_trade(
        &self,
        symbol: &str,
        date: i64,
        price_level: Decimal,
        volume: Decimal,
        buy_volume: Decimal,
        sell_volume: Decimal,
        notional: Decimal,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO daily_trades (symbol, date, price_level, volume, buy_volume, sell_volume, notional, trade_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            ON CONFLICT(symbol, date, price_level) DO UPDATE SET
                volume = daily_trades.volume + excluded.volume,
                buy_volume = daily_trades.buy_volume + excluded.buy_volume,
                sell_volume = daily_trades.sell_volume + excluded.sell_volume,
                notional = daily_trades.notional + excluded.notional,
                trade_count = daily_trades.trade_count + 1
            "#,
            params![
                symbol,
                date,
                to_f64(price_level),
                to_f64(volume),
                to_f64(buy_volume),
                to_f64(sell_volume),
                to_f64(notional),
            ],
        )
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_session_level(
        &self,
        symbol: &str,
        date: i64,
        session: &str,
        price: Decimal,
        timestamp: i64,
        volume: Decimal,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO session_levels (symbol, date, session, high, low, high_time, low_time, volume)
            VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5, ?6)
            ON CONFLICT(symbol, date, session) DO UPDATE SET
                high_time = CASE WHEN excluded.high > session_levels.high THEN excluded.high_time ELSE session_levels.high_time END,
                low_time = CASE WHEN excluded.low < session_levels.low THEN excluded.low_time ELSE session_levels.low_time END,
                high = MAX(session_levels.high, excluded.high),
                low = MIN(session_levels.low, excluded.low),
                volume = session_levels.volume + excluded.volume
            "#,
            params![symbol, date, session, to_f64(price), timestamp, to_f64(volume)],
        )
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn add_vwap(
        &self,
        symbol: &str,
        date: i64,
        pv_increment: Decimal,
        v_increment: Decimal,
        last_update: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO vwap_data (symbol, date, cumulative_pv, cumulative_v, last_update)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(symbol, date) DO UPDATE SET
                cumulative_pv = vwap_data.cumulative_pv + excluded.cumulative_pv,
                cumulative_v = vwap_data.cumulative_v + excluded.cumulative_v,
                last_update = excluded.last_update
            "#,
            params![symbol, date, to_f64(pv_increment), to_f64(v_increment), last_update],
        )
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn save_oi_snapshot(
        &self,
        symbol: &str,
        timestamp: i64,
        open_interest: Decimal,
        open_interest_value: Option<Decimal>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO oi_snapshots (symbol, timestamp, open_interest, open_interest_value)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                symbol,
                timestamp,
                to_f64(open_interest),
                open_interest_value.map(to_f64),
            ],
        )
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn save_depth_delta(
        &self,
        symbol: &str,
        timestamp: i64,
        percent_range: Decimal,
        mid_price: Decimal,
        bid_volume: Decimal,
        ask_volume: Decimal,
        net_volume: Decimal,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO depth_delta (symbol, timestamp, percent_range, mid_price, bid_volume, ask_volume, net_volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                symbol,
                timestamp,
                to_f64(percent_range),
                to_f64(mid_price),
                to_f64(bid_volume),
                to_f64(ask_volume),
                to_f64(net_volume),
            ],
        )
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn save_liquidation(&self, liq: &Liquidation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO liquidations (symbol, side, price, avg_price, original_qty, filled_qty, order_status, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                liq.symbol,
                liq.side,
                to_f64(liq.price),
                to_f64(liq.avg_price),
                to_f64(liq.original_qty),
                to_f64(liq.filled_qty),
                liq.order_status,
                liq.timestamp,
            ],
        )
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete rows older than the cutoff across all time-keyed tables
    pub fn cleanup_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let mut deleted = 0usize;
        for (table, column) in [
            ("footprint_1m", "timestamp"),
            ("daily_trades", "date"),
            ("session_levels", "date"),
            ("vwap_data", "date"),
            ("oi_snapshots", "timestamp"),
            ("depth_delta", "timestamp"),
            ("liquidations", "timestamp"),
        ] {
            let sql = format!("DELETE FROM {} WHERE {} < ?1", table, column);
            deleted += conn
                .execute(&sql, params![cutoff_ms])
                .map_err(|e| OrderflowError::Storage(e.to_string()))?;
        }
        Ok(deleted)
    }

    // ==================== reads ====================

    /// Footprint rows for `[start, end)`, ascending by time then price
    pub fn footprint_range(
        &self,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<FootprintRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, price_level, buy_volume, sell_volume, trade_count
                 FROM footprint_1m
                 WHERE symbol = ?1 AND timestamp >= ?2 AND timestamp < ?3
                 ORDER BY timestamp ASC, price_level ASC",
            )
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![symbol, start_time, end_time], |row| {
                Ok(FootprintRow {
                    timestamp: row.get(0)?,
                    price_level: to_decimal(row.get(1)?),
                    buy_volume: to_decimal(row.get(2)?),
                    sell_volume: to_decimal(row.get(3)?),
                    trade_count: row.get::<_, i64>(4)? as u64,
                })
            })
            .map_err(|e| OrderflowError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        Ok(rows)
    }

    /// Volume-profile rows for one UTC day
    pub fn daily_trades(&self, symbol: &str, date: i64) -> Result<Vec<DailyTradeRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT price_level, volume, buy_volume, sell_volume, notional, trade_count
                 FROM daily_trades
                 WHERE symbol = ?1 AND date = ?2
                 ORDER BY price_level ASC",
            )
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![symbol, date], |row| {
                Ok(DailyTradeRow {
                    price_level: to_decimal(row.get(0)?),
                    volume: to_decimal(row.get(1)?),
                    buy_volume: to_decimal(row.get(2)?),
                    sell_volume: to_decimal(row.get(3)?),
                    notional: to_decimal(row.get(4)?),
                    trade_count: row.get::<_, i64>(5)? as u64,
                })
            })
            .map_err(|e| OrderflowError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        Ok(rows)
    }

    /// Session levels for one UTC day
    pub fn session_levels(&self, symbol: &str, date: i64) -> Result<Vec<SessionLevelRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT session, high, low, high_time, low_time, volume
                 FROM session_levels
                 WHERE symbol = ?1 AND date = ?2",
            )
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![symbol, date], |row| {
                Ok(SessionLevelRow {
                    session: row.get(0)?,
                    high: row.get::<_, Option<f64>>(1)?.map(to_decimal),
                    low: row.get::<_, Option<f64>>(2)?.map(to_decimal),
                    high_time: row.get(3)?,
                    low_time: row.get(4)?,
                    volume: to_decimal(row.get(5)?),
                })
            })
            .map_err(|e| OrderflowError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        Ok(rows)
    }

    /// VWAP accumulators for one UTC day
    pub fn vwap(&self, symbol: &str, date: i64) -> Result<Option<VwapRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT cumulative_pv, cumulative_v, last_update
                 FROM vwap_data WHERE symbol = ?1 AND date = ?2",
            )
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        let row = stmt
            .query_row(params![symbol, date], |row| {
                Ok(VwapRow {
                    cumulative_pv: to_decimal(row.get(0)?),
                    cumulative_v: to_decimal(row.get(1)?),
                    last_update: row.get(2)?,
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(OrderflowError::Storage(other.to_string())),
            })?;

        Ok(row)
    }

    /// Recent liquidations, newest first, optionally filtered by side
    pub fn liquidations(
        &self,
        symbol: &str,
        limit: usize,
        side: Option<&str>,
    ) -> Result<Vec<Liquidation>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT symbol, side, price, avg_price, original_qty, filled_qty, order_status, timestamp
             FROM liquidations WHERE symbol = ?1",
        );
        if side.is_some() {
            sql.push_str(" AND side = ?3");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?2");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(Liquidation {
                symbol: row.get(0)?,
                side: row.get(1)?,
                price: to_decimal(row.get(2)?),
                avg_price: to_decimal(row.get(3)?),
                original_qty: to_decimal(row.get(4)?),
                filled_qty: to_decimal(row.get(5)?),
                order_status: row.get(6)?,
                timestamp: row.get(7)?,
            })
        };

        let rows = if let Some(side) = side {
            stmt.query_map(params![symbol, limit as i64, side], map_row)
                .map_err(|e| OrderflowError::Storage(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
        } else {
            stmt.query_map(params![symbol, limit as i64], map_row)
                .map_err(|e| OrderflowError::Storage(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
        }
        .map_err(|e| OrderflowError::Storage(e.to_string()))?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_footprint_additive_upsert() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_footprint_level("BTCUSDT", 60_000, dec("50000"), dec("1.0"), dec("0.5"), 3)
            .unwrap();
        store
            .upsert_footprint_level("BTCUSDT", 60_000, dec("50000"), dec("2.0"), dec("1.5"), 2)
            .unwrap();

        let rows = store.footprint_range("BTCUSDT", 0, 120_000).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].buy_volume, dec("3"));
        assert_eq!(rows[0].sell_volume, dec("2"));
        assert_eq!(rows[0].trade_count, 5);
    }

    #[test]
    fn test_session_level_extrema_upsert() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_session_level("BTCUSDT", 0, "tokyo", dec("50000"), 100, dec("1"))
            .unwrap();
        store
            .upsert_session_level("BTCUSDT", 0, "tokyo", dec("50500"), 200, dec("2"))
            .unwrap();
        store
            .upsert_session_level("BTCUSDT", 0, "tokyo", dec("49800"), 300, dec("3"))
            .unwrap();

        let rows = store.session_levels("BTCUSDT", 0).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.high, Some(dec("50500")));
        assert_eq!(row.high_time, Some(200));
        assert_eq!(row.low, Some(dec("49800")));
        assert_eq!(row.low_time, Some(300));
        assert_eq!(row.volume, dec("6"));
    }

    #[test]
    fn test_vwap_accumulates() {
        let store = SqliteStore::open_memory().unwrap();
        store.add_vwap("BTCUSDT", 0, dec("50000"), dec("1"), 10).unwrap();
        store.add_vwap("BTCUSDT", 0, dec("102000"), dec("2"), 20).unwrap();

        let row = store.vwap("BTCUSDT", 0).unwrap().unwrap();
        assert_eq!(row.cumulative_pv, dec("152000"));
        assert_eq!(row.cumulative_v, dec("3"));
        assert_eq!(row.last_update, 20);
        assert!(store.vwap("BTCUSDT", 86_400_000).unwrap().is_none());
    }

    #[test]
    fn test_liquidations_roundtrip_and_filter() {
        let store = SqliteStore::open_memory().unwrap();
        for (side, ts) in [("SELL", 1), ("BUY", 2), ("SELL", 3)] {
            store
                .save_liquidation(&Liquidation {
                    symbol: "BTCUSDT".into(),
                    side: side.into(),
                    price: dec("49000"),
                    avg_price: dec("49050"),
                    original_qty: dec("1"),
                    filled_qty: dec("1"),
                    timestamp: ts,
                    order_status: "FILLED".into(),
                })
                .unwrap();
        }

        let all = store.liquidations("BTCUSDT", 10, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].timestamp, 3); // newest first

        let sells = store.liquidations("BTCUSDT", 10, Some("SELL")).unwrap();
        assert_eq!(sells.len(), 2);
    }

    #[test]
    fn test_cleanup_retention() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_footprint_level("BTCUSDT", 1_000, dec("50000"), dec("1"), dec("1"), 1)
            .unwrap();
        store
            .upsert_footprint_level("BTCUSDT", 9_000, dec("50000"), dec("1"), dec("1"), 1)
            .unwrap();

        let deleted = store.cleanup_older_than(5_000).unwrap();
        assert_eq!(deleted, 1);
        let rows = store.footprint_range("BTCUSDT", 0, 10_000).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 9_000);
    }
}
