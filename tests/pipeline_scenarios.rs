//! End-to-end pipeline scenarios: trades flow through the aggregator into
//! every engine, and the tool layer composes the same numbers back out.

use orderflow_provider::config::Settings;
use orderflow_provider::market::Trade;
use orderflow_provider::supervisor::AppContext;
use orderflow_provider::tools;
use orderflow_provider::util::time::MS_PER_DAY;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Decimal from a JSON string field (scale-insensitive comparisons)
fn jdec(value: &serde_json::Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal field is a string")).unwrap()
}

fn context() -> Arc<AppContext> {
    let mut settings = Settings::from_env().unwrap();
    settings.cache_db_path = ":memory:".to_string();
    AppContext::initialize(settings).unwrap()
}

fn trade(price: &str, qty: &str, buyer_maker: bool, ts: i64) -> Trade {
    Trade {
        agg_trade_id: 0,
        symbol: "BTCUSDT".into(),
        price: dec(price),
        quantity: dec(qty),
        timestamp: ts,
        is_buyer_maker: buyer_maker,
    }
}

#[tokio::test]
async fn single_trade_reaches_every_engine_once() {
    let ctx = context();
    ctx.aggregator
        .process_trade(&trade("50000", "2.0", false, 3_600_000))
        .await;

    // VWAP
    let vwap = ctx.vwap.snapshot("BTCUSDT").await;
    assert_eq!(vwap.d_vwap, Some(dec("50000")));
    assert_eq!(vwap.developing.unwrap().trade_count, 1);

    // Volume profile
    let profile = ctx.volume_profile.today("BTCUSDT").await.unwrap();
    assert_eq!(profile.total_volume, dec("2.0"));

    // Sessions (01:00 UTC is inside Tokyo only)
    let sessions = ctx.sessions.snapshot_at("BTCUSDT", 3_700_000).await;
    assert_eq!(sessions.current.len(), 1);
    assert_eq!(sessions.current[0].name, "tokyo");
    assert_eq!(sessions.current[0].volume, dec("2.0"));

    // Delta / CVD
    assert_eq!(ctx.delta_cvd.cvd("BTCUSDT").await, dec("2.0"));

    // Footprint bars exist for every tracked timeframe
    for tf in ["1m", "5m", "15m", "30m", "1h"] {
        let bar = ctx.aggregator.current_bar("BTCUSDT", tf).await.unwrap();
        assert_eq!(bar.total_volume(), dec("2.0"), "timeframe {}", tf);
    }
}

#[tokio::test]
async fn cvd_identity_over_trade_list() {
    let ctx = context();
    let quantities: [(&str, bool); 3] = [("1", false), ("2", true), ("5", false)];
    for (qty, maker) in quantities {
        ctx.aggregator
            .process_trade(&trade("50000", qty, maker, 1_000))
            .await;
    }
    assert_eq!(ctx.delta_cvd.cvd("BTCUSDT").await, dec("4"));
}

#[tokio::test]
async fn footprint_tool_merges_store_and_live_bars() {
    let ctx = context();

    // One finalized 1m bar (minute 0) and one developing bar (minute 1)
    ctx.aggregator
        .process_trade(&trade("50000.05", "10", false, 10_000))
        .await;
    ctx.aggregator
        .process_trade(&trade("50000.05", "5", true, 20_000))
        .await;
    ctx.aggregator
        .process_trade(&trade("50010.00", "3", false, 70_000))
        .await;
    ctx.writer.flush().await;

    let result = tools::dispatch(
        &ctx,
        "get_footprint",
        json!({
            "symbol": "BTCUSDT",
            "timeframe": "1m",
            "startTime": 0,
            "endTime": 120_000,
        }),
    )
    .await
    .unwrap();

    assert_eq!(result["barCount"], 2);
    let bars = result["bars"].as_array().unwrap();
    assert_eq!(bars[0]["openTime"], 0);
    assert_eq!(jdec(&bars[0]["buyVolume"]), dec("10"));
    assert_eq!(jdec(&bars[0]["sellVolume"]), dec("5"));
    assert_eq!(jdec(&bars[0]["delta"]), dec("5"));
    assert_eq!(bars[1]["openTime"], 60_000);
    assert_eq!(jdec(&bars[1]["buyVolume"]), dec("3"));

    // Re-aggregating the same range at 5m folds both minutes together
    let result = tools::dispatch(
        &ctx,
        "get_footprint",
        json!({
            "symbol": "BTCUSDT",
            "timeframe": "5m",
            "startTime": 0,
            "endTime": 300_000,
        }),
    )
    .await
    .unwrap();
    assert_eq!(result["barCount"], 1);
    assert_eq!(jdec(&result["bars"][0]["totalVolume"]), dec("18"));
}

#[tokio::test]
async fn footprint_aggregation_matches_direct_5m() {
    let ctx = context();

    // Five minutes of identical flow
    for minute in 0..5i64 {
        ctx.aggregator
            .process_trade(&trade("50000.00", "10", false, minute * 60_000 + 1))
            .await;
        ctx.aggregator
            .process_trade(&trade("50000.00", "5", true, minute * 60_000 + 2))
            .await;
    }

    // The developing 5m bar aggregated the original trades directly
    let five = ctx.aggregator.current_bar("BTCUSDT", "5m").await.unwrap();
    let level = &five.levels[&dec("50000.0")];
    assert_eq!(level.buy_volume, dec("50"));
    assert_eq!(level.sell_volume, dec("25"));
    assert_eq!(five.delta(), dec("25"));
    assert_eq!(five.total_volume(), dec("75"));
}

#[tokio::test]
async fn orderflow_metrics_tool_reports_delta_and_imbalance() {
    let ctx = context();

    // Minute 0: a stacked buy imbalance across three adjacent levels,
    // then an opposing level
    let levels: [(&str, &str, &str); 4] = [
        ("50000.0", "30", "5"),
        ("50000.1", "15", "3"),
        ("50000.2", "12", "2"),
        ("50000.3", "4", "10"),
    ];
    for (price, buy, sell) in levels {
        ctx.aggregator
            .process_trade(&trade(price, buy, false, 10_000))
            .await;
        ctx.aggregator
            .process_trade(&trade(price, sell, true, 11_000))
            .await;
    }
    // Minute 1 trade finalizes the minute-0 bar
    ctx.aggregator
        .process_trade(&trade("50000.0", "1", false, 70_000))
        .await;

    let result = tools::dispatch(
        &ctx,
        "get_orderflow_metrics",
        json!({"symbol": "BTCUSDT", "timeframe": "1m"}),
    )
    .await
    .unwrap();

    let imbalances = &result["imbalances"];
    assert_eq!(imbalances["buyStacks"], 1);
    assert_eq!(imbalances["sellStacks"], 0);
    let stack = &imbalances["stacked"][0];
    assert_eq!(stack["direction"], "buy");
    assert_eq!(stack["levelCount"], 3);
    assert_eq!(jdec(&stack["startPrice"]), dec("50000.0"));
    assert_eq!(jdec(&stack["endPrice"]), dec("50000.2"));

    // Delta sequence covers both bars; CVD is the running delta sum
    assert_eq!(result["barCount"], 2);
    let cvd_seq = result["cvdSequence"].as_array().unwrap();
    let last_cvd = cvd_seq.last().unwrap();
    assert_eq!(jdec(&last_cvd["cvd"]), dec("42"));
}

#[tokio::test]
async fn key_levels_tool_composes_vwap_profile_sessions() {
    use orderflow_provider::util::time::{day_start_ms, now_ms};

    let ctx = context();

    // The tool resolves "today" from the wall clock, so anchor the trades
    // to the actual current UTC day
    let today_start = day_start_ms(now_ms());

    // Yesterday: a single trade during Tokyo
    ctx.aggregator
        .process_trade(&trade(
            "50000.0",
            "1.0",
            false,
            today_start - MS_PER_DAY + 3_600_000,
        ))
        .await;
    // Today: trades during London at two price levels
    let today = today_start + 8 * 3_600_000;
    ctx.aggregator
        .process_trade(&trade("51000.0", "2.0", false, today))
        .await;
    ctx.aggregator
        .process_trade(&trade("51000.1", "1.0", true, today + 1_000))
        .await;
    ctx.writer.flush().await;

    let result = tools::dispatch(
        &ctx,
        "get_key_levels",
        json!({"symbol": "BTCUSDT"}),
    )
    .await
    .unwrap();

    // VWAP: today (2*51000 + 1*51000.1) / 3, yesterday 50000
    assert_eq!(jdec(&result["pdVWAP"]), dec("50000"));
    let d_vwap = jdec(&result["dVWAP"]);
    assert!(d_vwap > dec("51000.03") && d_vwap < dec("51000.04"), "dVWAP was {}", d_vwap);

    // Profile POC of the developing day is the heavier bucket
    assert_eq!(jdec(&result["dPOC"]), dec("51000.0"));
    assert_eq!(jdec(&result["pdPOC"]), dec("50000.0"));

    // Sessions: today's London high, yesterday's Tokyo preserved
    assert_eq!(jdec(&result["londonH"]), dec("51000.1"));
    assert_eq!(jdec(&result["pTokyoH"]), dec("50000.0"));
}

#[tokio::test]
async fn liquidations_tool_reports_ring_and_stats() {
    use orderflow_provider::market::Liquidation;

    let ctx = context();
    for (side, qty, ts) in [("SELL", "1.0", 1_000i64), ("BUY", "0.5", 2_000)] {
        ctx.liquidations
            .add(Liquidation {
                symbol: "BTCUSDT".into(),
                side: side.into(),
                price: dec("49000"),
                avg_price: dec("49000"),
                original_qty: dec(qty),
                filled_qty: dec(qty),
                timestamp: ts,
                order_status: "FILLED".into(),
            })
            .await;
    }

    let result = tools::dispatch(
        &ctx,
        "stream_liquidations",
        json!({"symbol": "BTCUSDT", "limit": 10}),
    )
    .await
    .unwrap();

    assert_eq!(result["count"], 2);
    let stats = &result["statistics"];
    assert_eq!(stats["longCount"], 1);
    assert_eq!(stats["shortCount"], 1);
    assert_eq!(stats["dominantSide"], "longs");
    assert_eq!(stats["oldestTimestamp"], 1_000);
    assert_eq!(stats["newestTimestamp"], 2_000);
}

#[tokio::test]
async fn trade_at_day_boundary_credits_new_day() {
    let ctx = context();
    ctx.aggregator
        .process_trade(&trade("50000", "1", false, MS_PER_DAY - 1))
        .await;
    ctx.aggregator
        .process_trade(&trade("60000", "1", false, MS_PER_DAY))
        .await;

    let vwap = ctx.vwap.snapshot("BTCUSDT").await;
    assert_eq!(vwap.d_vwap, Some(dec("60000")));
    assert_eq!(vwap.pd_vwap, Some(dec("50000")));

    let profile = ctx.volume_profile.today("BTCUSDT").await.unwrap();
    assert_eq!(profile.total_volume, dec("1"));
}
