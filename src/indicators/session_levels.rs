//! Session high/low engine
//!
//! Rolling extrema for the Tokyo, London and New York windows. Sessions
//! are UTC half-open intervals and may overlap; a trade updates every
//! session whose window contains it. At UTC-day rollover the current
//! sessions move to the previous-day slots.

use crate::config::{Settings, SessionWindow};
use crate::indicators::TradeSink;
use crate::market::Trade;
use crate::storage::{StoreMessage, StoreWriter};
use crate::util::time::{day_start_ms, minutes_of_day, now_ms};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Extrema and volume of one session instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLevels {
    pub name: &'static str,
    pub start_time: i64,
    pub end_time: i64,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub high_time: Option<i64>,
    pub low_time: Option<i64>,
    pub volume: Decimal,
    pub complete: bool,
}

impl SessionLevels {
    fn new(name: &'static str, window: SessionWindow, day_start: i64) -> Self {
        let (start_time, end_time) = window.bounds_for_day(day_start);
        Self {
            name,
            start_time,
            end_time,
            high: None,
            low: None,
            high_time: None,
            low_time: None,
            volume: Decimal::ZERO,
            complete: false,
        }
    }

    fn apply(&mut self, trade: &Trade) {
        self.volume += trade.quantity;
        if self.high.map_or(true, |h| trade.price > h) {
            self.high = Some(trade.price);
            self.high_time = Some(trade.timestamp);
        }
        if self.low.map_or(true, |l| trade.price < l) {
            self.low = Some(trade.price);
            self.low_time = Some(trade.timestamp);
        }
    }
}

struct SessionState {
    day_start: i64,
    current: HashMap<&'static str, SessionLevels>,
    previous: HashMap<&'static str, SessionLevels>,
}

/// Today + yesterday levels for every named session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub current: Vec<SessionLevels>,
    pub previous: Vec<SessionLevels>,
}

impl SessionSnapshot {
    /// Flat form: `tokyoH`, `tokyoL`, `pTokyoH`, ... keyed by session name
    pub fn flat(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for session in &self.current {
            out.insert(format!("{}H", session.name), json!(session.high));
            out.insert(format!("{}L", session.name), json!(session.low));
        }
        for session in &self.previous {
            let cap = capitalize(session.name);
            out.insert(format!("p{}H", cap), json!(session.high));
            out.insert(format!("p{}L", cap), json!(session.low));
        }
        serde_json::Value::Object(out)
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Session extrema per symbol with UTC-day rollover
pub struct SessionLevelEngine {
    settings: Arc<Settings>,
    states: RwLock<HashMap<String, SessionState>>,
    writer: StoreWriter,
}

impl SessionLevelEngine {
    pub fn new(settings: Arc<Settings>, writer: StoreWriter) -> Self {
        Self {
            settings,
            states: RwLock::new(HashMap::new()),
            writer,
        }
    }

    /// Snapshot with `complete` evaluated against `as_of` wall time
    pub async fn snapshot_at(&self, symbol: &str, as_of: i64) -> SessionSnapshot {
        let states = self.states.read().await;
        let Some(state) = states.get(&symbol.to_uppercase()) else {
            return SessionSnapshot {
                current: Vec::new(),
                previous: Vec::new(),
            };
        };

        let order = ["tokyo", "london", "ny"];
        let mut current = Vec::new();
        for name in order {
            if let Some(session) = state.current.get(name) {
                let mut session = session.clone();
                session.complete = as_of >= session.end_time;
                current.push(session);
            }
        }
        let mut previous = Vec::new();
        for name in order {
            if let Some(session) = state.previous.get(name) {
                previous.push(session.clone());
            }
        }

        SessionSnapshot { current, previous }
    }

    pub async fn snapshot(&self, symbol: &str) -> SessionSnapshot {
        self.snapshot_at(symbol, now_ms()).await
    }

    fn roll_state(state: &mut SessionState, day_start: i64, symbol: &str) {
        if day_start <= state.day_start {
            return;
        }
        let finished = std::mem::take(&mut state.current);
        state.previous = finished
            .into_iter()
            .map(|(name, mut session)| {
                session.complete = true;
                (name, session)
            })
            .collect();
        state.day_start = day_start;
        tracing::info!(symbol = %symbol, day_start, "Session levels rolled over");
    }
}

#[async_trait]
impl TradeSink for SessionLevelEngine {
    fn name(&self) -> &'static str {
        "session_levels"
    }

    async fn on_trade(&self, trade: &Trade) {
        let day_start = day_start_ms(trade.timestamp);
        let minute = minutes_of_day(trade.timestamp);

        let mut states = self.states.write().await;
        let state = states
            .entry(trade.symbol.clone())
            .or_insert_with(|| SessionState {
                day_start,
                current: HashMap::new(),
                previous: HashMap::new(),
            });

        Self::roll_state(state, day_start, &trade.symbol);

        for (name, window) in self.settings.sessions() {
            if !window.contains(minute) {
                continue;
            }

            let session = state
                .current
                .entry(name)
                .or_insert_with(|| SessionLevels::new(name, window, day_start));
            session.apply(trade);

            self.writer.send(StoreMessage::SessionLevel {
                symbol: trade.symbol.clone(),
                date: day_start,
                session: name,
                price: trade.price,
                timestamp: trade.timestamp,
                volume: trade.quantity,
            });
        }
    }

    async fn on_rollover(&self, day_start: i64) {
        let mut states = self.states.write().await;
        for (symbol, state) in states.iter_mut() {
            Self::roll_state(state, day_start, symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::util::time::MS_PER_DAY;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn trade(price: &str, qty: &str, ts: i64) -> Trade {
        Trade {
            agg_trade_id: 0,
            symbol: "BTCUSDT".into(),
            price: dec(price),
            quantity: dec(qty),
            timestamp: ts,
            is_buyer_maker: false,
        }
    }

    fn engine() -> SessionLevelEngine {
        let settings = Arc::new(Settings::from_env().unwrap());
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        SessionLevelEngine::new(settings, StoreWriter::spawn(store))
    }

    #[tokio::test]
    async fn test_overlapping_sessions_both_update() {
        let engine = engine();
        // 08:00 UTC falls inside Tokyo (00:00-09:00) and London (07:00-16:00)
        let ts = 8 * 3_600_000;
        engine.on_trade(&trade("50000", "1", ts)).await;

        let snap = engine.snapshot_at("BTCUSDT", ts).await;
        let names: Vec<_> = snap.current.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["tokyo", "london"]);
        for session in &snap.current {
            assert_eq!(session.high, Some(dec("50000")));
            assert_eq!(session.volume, dec("1"));
        }
    }

    #[tokio::test]
    async fn test_extrema_and_times() {
        let engine = engine();
        let base = 2 * 3_600_000; // Tokyo only
        engine.on_trade(&trade("50000", "1", base)).await;
        engine.on_trade(&trade("50500", "1", base + 1_000)).await;
        engine.on_trade(&trade("49500", "1", base + 2_000)).await;

        let snap = engine.snapshot_at("BTCUSDT", base + 3_000).await;
        let tokyo = &snap.current[0];
        assert_eq!(tokyo.high, Some(dec("50500")));
        assert_eq!(tokyo.high_time, Some(base + 1_000));
        assert_eq!(tokyo.low, Some(dec("49500")));
        assert_eq!(tokyo.low_time, Some(base + 2_000));
        assert_eq!(tokyo.volume, dec("3"));
        assert!(!tokyo.complete);
    }

    #[tokio::test]
    async fn test_session_complete_after_end() {
        let engine = engine();
        let ts = 2 * 3_600_000;
        engine.on_trade(&trade("50000", "1", ts)).await;

        // Past Tokyo's 09:00 end the session reads complete
        let snap = engine.snapshot_at("BTCUSDT", 10 * 3_600_000).await;
        assert!(snap.current[0].complete);
    }

    #[tokio::test]
    async fn test_outside_all_sessions_no_update() {
        let engine = engine();
        // 23:00 UTC is outside Tokyo, London and NY windows
        engine.on_trade(&trade("50000", "1", 23 * 3_600_000)).await;
        let snap = engine.snapshot_at("BTCUSDT", 23 * 3_600_000).await;
        assert!(snap.current.is_empty());
    }

    #[tokio::test]
    async fn test_rollover_moves_current_to_previous() {
        let engine = engine();
        engine.on_trade(&trade("50000", "1", 3_600_000)).await;
        engine
            .on_trade(&trade("51000", "1", MS_PER_DAY + 3_600_000))
            .await;

        let snap = engine
            .snapshot_at("BTCUSDT", MS_PER_DAY + 2 * 3_600_000)
            .await;
        assert_eq!(snap.previous.len(), 1);
        assert_eq!(snap.previous[0].high, Some(dec("50000")));
        assert!(snap.previous[0].complete);
        assert_eq!(snap.current[0].high, Some(dec("51000")));
    }

    #[tokio::test]
    async fn test_flat_form_keys() {
        let engine = engine();
        engine.on_trade(&trade("50000", "1", 3_600_000)).await;
        engine
            .on_trade(&trade("51000", "1", MS_PER_DAY + 3_600_000))
            .await;

        let snap = engine
            .snapshot_at("BTCUSDT", MS_PER_DAY + 2 * 3_600_000)
            .await;
        let flat = snap.flat();
        assert_eq!(flat["tokyoH"], json!(dec("51000")));
        assert_eq!(flat["pTokyoH"], json!(dec("50000")));
    }
}
