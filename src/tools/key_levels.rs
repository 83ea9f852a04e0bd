//! get_key_levels tool
//!
//! Developing and previous-day VWAP and Volume Profile levels, plus the
//! session highs and lows for today and yesterday (nested and flat forms).
//! Days the engines have not seen are backfilled from the store.

use crate::error::{OrderflowError, Result};
use crate::supervisor::AppContext;
use crate::util::time::{day_start_ms, now_ms, MS_PER_DAY};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KeyLevelsArgs {
    /// Trading pair symbol, e.g. BTCUSDT
    pub symbol: String,
    /// Date (YYYY-MM-DD, UTC); defaults to today
    #[serde(default)]
    pub date: Option<String>,
    /// Session timezone label (informational; sessions are defined in UTC)
    #[serde(rename = "sessionTZ", default)]
    pub session_tz: Option<String>,
}

fn parse_date(date: &str) -> Result<i64> {
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| OrderflowError::InvalidRequest(format!("Invalid date {}: {}", date, e)))?;
    Ok(parsed
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc()
        .timestamp_millis())
}

pub async fn run(ctx: &AppContext, args: KeyLevelsArgs) -> Result<Value> {
    let symbol = args.symbol.to_uppercase();
    let now = now_ms();
    let today_start = day_start_ms(now);

    let day_start = match &args.date {
        Some(date) => parse_date(date)?,
        None => today_start,
    };
    let prev_day_start = day_start - MS_PER_DAY;

    // VWAP: engines for the live day, store for anything older
    let (d_vwap, pd_vwap) = if day_start == today_start {
        let snap = ctx.vwap.snapshot(&symbol).await;
        let pd = match snap.pd_vwap {
            Some(v) => Some(v),
            None => stored_vwap(ctx, &symbol, prev_day_start).await,
        };
        (snap.d_vwap, pd)
    } else {
        (
            stored_vwap(ctx, &symbol, day_start).await,
            stored_vwap(ctx, &symbol, prev_day_start).await,
        )
    };

    // Volume profile
    let (developing, previous) = if day_start == today_start {
        let today = ctx.volume_profile.today(&symbol).await;
        let yesterday = match ctx.volume_profile.yesterday(&symbol).await {
            Some(snapshot) => Some(snapshot_to_json(snapshot)),
            None => stored_profile(ctx, &symbol, prev_day_start).await,
        };
        (today.map(snapshot_to_json), yesterday)
    } else {
        (
            stored_profile(ctx, &symbol, day_start).await,
            stored_profile(ctx, &symbol, prev_day_start).await,
        )
    };

    let null_profile = json!({
        "POC": null, "VAH": null, "VAL": null,
        "totalVolume": "0", "priceLevels": 0,
    });
    let developing = developing.unwrap_or_else(|| null_profile.clone());
    let previous = previous.unwrap_or(null_profile);

    // Sessions
    let sessions = ctx.sessions.snapshot_at(&symbol, now).await;

    let mut doc = json!({
        "symbol": symbol,
        "exchange": "binance",
        "marketType": "linear_perpetual",
        "timestamp": now,
        "date": day_start,
        "sessionTZ": args.session_tz.unwrap_or_else(|| "UTC".to_string()),
        "dVWAP": d_vwap,
        "pdVWAP": pd_vwap,
        // Convenience aliases for the profile bounds
        "dPOC": field(&developing, "POC"),
        "dVAH": field(&developing, "VAH"),
        "dVAL": field(&developing, "VAL"),
        "pdPOC": field(&previous, "POC"),
        "pdVAH": field(&previous, "VAH"),
        "pdVAL": field(&previous, "VAL"),
        "volumeProfile": {
            "developing": developing,
            "previousDay": previous,
        },
        "sessions": {
            "current": sessions.current,
            "previous": sessions.previous,
        },
    });

    // Flat session keys merged at the top level
    if let (Value::Object(out), Value::Object(flat)) = (&mut doc, sessions.flat()) {
        for (key, value) in flat {
            out.insert(key, value);
        }
    }

    Ok(doc)
}

fn field(profile: &Value, key: &str) -> Value {
    profile.get(key).cloned().unwrap_or(Value::Null)
}

async fn stored_vwap(ctx: &AppContext, symbol: &str, date: i64) -> Option<Decimal> {
    match ctx.store.vwap(symbol, date) {
        Ok(Some(row)) if !row.cumulative_v.is_zero() => {
            Some(row.cumulative_pv / row.cumulative_v)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(symbol = %symbol, date, error = %e, "Stored VWAP read failed");
            None
        }
    }
}

async fn stored_profile(ctx: &AppContext, symbol: &str, date: i64) -> Option<Value> {
    let rows = match ctx.store.daily_trades(symbol, date) {
        Ok(rows) if !rows.is_empty() => rows,
        Ok(_) => return None,
        Err(e) => {
            tracing::warn!(symbol = %symbol, date, error = %e, "Stored profile read failed");
            return None;
        }
    };

    let mut levels: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    let mut total = Decimal::ZERO;
    for row in &rows {
        *levels.entry(row.price_level).or_insert(Decimal::ZERO) += row.volume;
        total += row.volume;
    }
    let va = ctx.volume_profile.value_area_of(&levels);

    Some(json!({
        "POC": va.poc,
        "VAH": va.vah,
        "VAL": va.val,
        "totalVolume": total,
        "priceLevels": levels.len(),
    }))
}

fn snapshot_to_json(snapshot: crate::indicators::volume_profile::ProfileSnapshot) -> Value {
    json!({
        "POC": snapshot.value_area.poc,
        "VAH": snapshot.value_area.vah,
        "VAL": snapshot.value_area.val,
        "totalVolume": snapshot.total_volume,
        "priceLevels": snapshot.price_levels,
        "high": snapshot.high,
        "low": snapshot.low,
    })
}
