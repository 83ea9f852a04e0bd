//! Volume Profile engine (POC / VAH / VAL)
//!
//! Price-binned volume per (symbol, UTC day). The Value Area expands from
//! the POC two buckets at a time, choosing the side whose next pair holds
//! more volume, and stops the moment the accumulated volume reaches the
//! configured share of the total.

use crate::config::Settings;
use crate::indicators::TradeSink;
use crate::market::Trade;
use crate::storage::{StoreMessage, StoreWriter};
use crate::util::round_to_tick;
use crate::util::time::day_start_ms;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// POC and value-area bounds of a profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueArea {
    pub poc: Option<Decimal>,
    pub vah: Option<Decimal>,
    pub val: Option<Decimal>,
}

impl ValueArea {
    const EMPTY: ValueArea = ValueArea {
        poc: None,
        vah: None,
        val: None,
    };
}

/// Point of Control: the bucket with the greatest volume, ties resolved to
/// the lowest price
pub fn point_of_control(levels: &BTreeMap<Decimal, Decimal>) -> Option<Decimal> {
    let mut best: Option<(Decimal, Decimal)> = None;
    for (price, volume) in levels {
        match best {
            // Strictly greater keeps the lowest price on ties (ascending walk)
            Some((_, best_volume)) if *volume <= best_volume => {}
            _ => best = Some((*price, *volume)),
        }
    }
    best.map(|(price, _)| price)
}

/// Compute POC, VAH and VAL for a profile
///
/// `value_area_pct` is a percentage (70 means 70%). Expansion considers the
/// next two stored buckets on each side, extends toward the heavier pair,
/// and stops as soon as the running volume reaches the target. An empty
/// profile yields all-`None`.
pub fn value_area(levels: &BTreeMap<Decimal, Decimal>, value_area_pct: Decimal) -> ValueArea {
    if levels.is_empty() {
        return ValueArea::EMPTY;
    }

    let total: Decimal = levels.values().copied().sum();
    if total.is_zero() {
        return ValueArea::EMPTY;
    }
    let target = total * value_area_pct / Decimal::ONE_HUNDRED;

    let prices: Vec<Decimal> = levels.keys().copied().collect();
    let volumes: Vec<Decimal> = levels.values().copied().collect();

    let poc = point_of_control(levels).expect("profile is non-empty");
    let poc_idx = prices
        .binary_search(&poc)
        .expect("POC price is a profile key");

    let mut low_idx = poc_idx;
    let mut high_idx = poc_idx;
    let mut running = volumes[poc_idx];

    while running < target && (low_idx > 0 || high_idx + 1 < prices.len()) {
        let up_pair: Decimal = volumes
            .get(high_idx + 1)
            .copied()
            .unwrap_or(Decimal::ZERO)
            + volumes.get(high_idx + 2).copied().unwrap_or(Decimal::ZERO);
        let down_pair: Decimal = if low_idx >= 1 {
            volumes[low_idx - 1]
                + if low_idx >= 2 {
                    volumes[low_idx - 2]
                } else {
                    Decimal::ZERO
                }
        } else {
            Decimal::ZERO
        };

        if up_pair >= down_pair && high_idx + 1 < prices.len() {
            for _ in 0..2 {
                if high_idx + 1 >= prices.len() {
                    break;
                }
                high_idx += 1;
                running += volumes[high_idx];
                if running >= target {
                    break;
                }
            }
        } else if low_idx > 0 {
            for _ in 0..2 {
                if low_idx == 0 {
                    break;
                }
                low_idx -= 1;
                running += volumes[low_idx];
                if running >= target {
                    break;
                }
            }
        } else {
            // Down side chosen but exhausted; expansion continues upward
            for _ in 0..2 {
                if high_idx + 1 >= prices.len() {
                    break;
                }
                high_idx += 1;
                running += volumes[high_idx];
                if running >= target {
                    break;
                }
            }
        }
    }

    ValueArea {
        poc: Some(poc),
        vah: Some(prices[high_idx]),
        val: Some(prices[low_idx]),
    }
}

/// One day's developing profile
#[derive(Debug, Clone)]
struct ProfileDay {
    day_start: i64,
    levels: BTreeMap<Decimal, Decimal>,
    total_volume: Decimal,
    high: Option<Decimal>,
    low: Option<Decimal>,
}

impl ProfileDay {
    fn new(day_start: i64) -> Self {
        Self {
            day_start,
            levels: BTreeMap::new(),
            total_volume: Decimal::ZERO,
            high: None,
            low: None,
        }
    }
}

struct ProfileState {
    current: ProfileDay,
    previous: Option<ProfileDay>,
}

impl ProfileState {
    fn roll_to(&mut self, day_start: i64, symbol: &str) {
        if day_start <= self.current.day_start {
            return;
        }
        let finished = std::mem::replace(&mut self.current, ProfileDay::new(day_start));
        tracing::info!(
            symbol = %symbol,
            day_start = finished.day_start,
            levels = finished.levels.len(),
            "Volume profile day rolled over"
        );
        self.previous = Some(finished);
    }
}

/// Profile summary for the key-levels tool
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub value_area: ValueArea,
    pub total_volume: Decimal,
    pub price_levels: usize,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
}

/// Per-symbol daily volume profile with lazy UTC-day rollover
pub struct VolumeProfileEngine {
    settings: Arc<Settings>,
    states: RwLock<HashMap<String, ProfileState>>,
    writer: StoreWriter,
}

impl VolumeProfileEngine {
    pub fn new(settings: Arc<Settings>, writer: StoreWriter) -> Self {
        Self {
            settings,
            states: RwLock::new(HashMap::new()),
            writer,
        }
    }

    /// Developing-day snapshot
    pub async fn today(&self, symbol: &str) -> Option<ProfileSnapshot> {
        let states = self.states.read().await;
        let state = states.get(&symbol.to_uppercase())?;
        Some(snapshot_of(&state.current, self.settings.value_area_percent))
    }

    /// Previous complete day's snapshot, if the engine saw it
    pub async fn yesterday(&self, symbol: &str) -> Option<ProfileSnapshot> {
        let states = self.states.read().await;
        let state = states.get(&symbol.to_uppercase())?;
        state
            .previous
            .as_ref()
            // A slot older than the adjacent day is stale, not "yesterday"
            .filter(|day| day.day_start == state.current.day_start - crate::util::time::MS_PER_DAY)
            .map(|day| snapshot_of(day, self.settings.value_area_percent))
    }

    /// Value area over an arbitrary profile (used for store-backed days)
    pub fn value_area_of(&self, levels: &BTreeMap<Decimal, Decimal>) -> ValueArea {
        value_area(levels, self.settings.value_area_percent)
    }
}

fn snapshot_of(day: &ProfileDay, pct: Decimal) -> ProfileSnapshot {
    ProfileSnapshot {
        value_area: value_area(&day.levels, pct),
        total_volume: day.total_volume,
        price_levels: day.levels.len(),
        high: day.high,
        low: day.low,
    }
}

#[async_trait]
impl TradeSink for VolumeProfileEngine {
    fn name(&self) -> &'static str {
        "volume_profile"
    }

    async fn on_trade(&self, trade: &Trade) {
        let day_start = day_start_ms(trade.timestamp);
        let tick_size = self.settings.tick_size(&trade.symbol);
        let price_level = round_to_tick(trade.price, tick_size);

        {
            let mut states = self.states.write().await;
            let state = states
                .entry(trade.symbol.clone())
                .or_insert_with(|| ProfileState {
                    current: ProfileDay::new(day_start),
                    previous: None,
                });

            state.roll_to(day_start, &trade.symbol);

            let day = &mut state.current;
            *day.levels.entry(price_level).or_insert(Decimal::ZERO) += trade.quantity;
            day.total_volume += trade.quantity;
            day.high = Some(day.high.map_or(trade.price, |h| h.max(trade.price)));
            day.low = Some(day.low.map_or(trade.price, |l| l.min(trade.price)));
        }

        self.writer.send(StoreMessage::DailyTrade {
            symbol: trade.symbol.clone(),
            date: day_start,
            price_level,
            volume: trade.quantity,
            buy_volume: trade.buy_volume(),
            sell_volume: trade.sell_volume(),
            notional: trade.notional(),
        });
    }

    async fn on_rollover(&self, day_start: i64) {
        let mut states = self.states.write().await;
        for (symbol, state) in states.iter_mut() {
            state.roll_to(day_start, symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn profile(pairs: &[(&str, &str)]) -> BTreeMap<Decimal, Decimal> {
        pairs
            .iter()
            .map(|(p, v)| (dec(p), dec(v)))
            .collect()
    }

    #[test]
    fn test_poc_tie_breaks_low() {
        let levels = profile(&[("100", "5"), ("101", "7"), ("102", "7")]);
        assert_eq!(point_of_control(&levels), Some(dec("101")));
    }

    #[test]
    fn test_empty_profile_yields_nulls() {
        let empty = BTreeMap::new();
        let va = value_area(&empty, dec("70"));
        assert_eq!(va, ValueArea::EMPTY);
    }

    #[test]
    fn test_single_level_profile() {
        let levels = profile(&[("50000", "10")]);
        let va = value_area(&levels, dec("70"));
        assert_eq!(va.poc, Some(dec("50000")));
        assert_eq!(va.vah, Some(dec("50000")));
        assert_eq!(va.val, Some(dec("50000")));
    }

    #[test]
    fn test_value_area_symmetric_expansion() {
        // POC at 50000 (30). First step: both pairs weigh 35, expand up two
        // buckets (running 65); second step the down pair is heavier,
        // expand down (85, then 100 >= 91 stops inside the pair).
        let levels = profile(&[
            ("49600", "5"),
            ("49700", "10"),
            ("49800", "15"),
            ("49900", "20"),
            ("50000", "30"),
            ("50100", "20"),
            ("50200", "15"),
            ("50300", "10"),
            ("50400", "5"),
        ]);

        let total: Decimal = levels.values().copied().sum();
        assert_eq!(total, dec("130"));

        let va = value_area(&levels, dec("70"));
        assert_eq!(va.poc, Some(dec("50000")));
        assert_eq!(va.vah, Some(dec("50200")));
        assert_eq!(va.val, Some(dec("49800")));

        // Invariants: VAL <= POC <= VAH and the enclosed volume covers the
        // configured share of the total
        let enclosed: Decimal = levels
            .range(va.val.unwrap()..=va.vah.unwrap())
            .map(|(_, v)| *v)
            .sum();
        assert!(enclosed >= dec("91"));
    }

    #[test]
    fn test_value_area_poc_at_edge() {
        // POC at the bottom edge: expansion can only go up
        let levels = profile(&[("100", "50"), ("101", "10"), ("102", "10"), ("103", "5")]);
        let va = value_area(&levels, dec("90"));
        assert_eq!(va.poc, Some(dec("100")));
        assert_eq!(va.val, Some(dec("100")));
        assert!(va.vah.unwrap() > dec("100"));
    }

    #[tokio::test]
    async fn test_engine_accumulates_and_rolls() {
        use crate::storage::SqliteStore;
        use crate::util::time::MS_PER_DAY;

        let settings = Arc::new(Settings::from_env().unwrap());
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let engine = VolumeProfileEngine::new(settings, StoreWriter::spawn(store));

        let trade = |price: &str, qty: &str, ts: i64| Trade {
            agg_trade_id: 0,
            symbol: "BTCUSDT".into(),
            price: dec(price),
            quantity: dec(qty),
            timestamp: ts,
            is_buyer_maker: false,
        };

        engine.on_trade(&trade("50000.07", "2", 1_000)).await;
        engine.on_trade(&trade("50000.01", "3", 2_000)).await;

        let today = engine.today("BTCUSDT").await.unwrap();
        // Both trades land in the 50000.0 bucket on the 0.1 BTC grid
        assert_eq!(today.price_levels, 1);
        assert_eq!(today.total_volume, dec("5"));
        assert_eq!(today.value_area.poc, Some(dec("50000.0")));

        engine.on_trade(&trade("51000", "1", MS_PER_DAY + 1)).await;
        let yesterday = engine.yesterday("BTCUSDT").await.unwrap();
        assert_eq!(yesterday.total_volume, dec("5"));
        let today = engine.today("BTCUSDT").await.unwrap();
        assert_eq!(today.total_volume, dec("1"));
    }
}
