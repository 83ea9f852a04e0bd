//! Single-writer task in front of the SQLite store
//!
//! Engines enqueue writes without blocking on the stream hot path; the
//! writer drains the channel in order, so persistence sees every update in
//! the same sequence the engines produced it. `Flush` acts as a barrier
//! (used by tests and graceful shutdown).

use crate::market::Liquidation;
use crate::storage::store::SqliteStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Message for the writer channel
pub enum StoreMessage {
    FootprintLevel {
        symbol: String,
        timestamp: i64,
        price_level: Decimal,
        buy_volume: Decimal,
        sell_volume: Decimal,
        trade_count: u64,
    },
    DailyTrade {
        symbol: String,
        date: i64,
        price_level: Decimal,
        volume: Decimal,
        buy_volume: Decimal,
        sell_volume: Decimal,
        notional: Decimal,
    },
    SessionLevel {
        symbol: String,
        date: i64,
        session: &'static str,
        price: Decimal,
        timestamp: i64,
        volume: Decimal,
    },
    VwapIncrement {
        symbol: String,
        date: i64,
        pv: Decimal,
        volume: Decimal,
        timestamp: i64,
    },
    OiSnapshot {
        symbol: String,
        timestamp: i64,
        open_interest: Decimal,
        open_interest_value: Option<Decimal>,
    },
    DepthDelta {
        symbol: String,
        timestamp: i64,
        percent_range: Decimal,
        mid_price: Decimal,
        bid_volume: Decimal,
        ask_volume: Decimal,
        net_volume: Decimal,
    },
    Liquidation(Liquidation),
    Cleanup {
        cutoff_ms: i64,
    },
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for enqueueing store writes
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreMessage>,
}

impl StoreWriter {
    /// Spawn the writer task over a shared store
    pub fn spawn(store: Arc<SqliteStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            Self::run(store, rx).await;
        });
        Self { tx }
    }

    pub fn send(&self, message: StoreMessage) {
        if self.tx.send(message).is_err() {
            tracing::warn!("Store writer channel closed, dropping write");
        }
    }

    /// Wait until every previously enqueued write has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(StoreMessage::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Drain the queue and stop the writer
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(StoreMessage::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn run(store: Arc<SqliteStore>, mut rx: mpsc::UnboundedReceiver<StoreMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                StoreMessage::FootprintLevel {
                    symbol,
                    timestamp,
                    price_level,
                    buy_volume,
                    sell_volume,
                    trade_count,
                } => {
                    if let Err(e) = store.upsert_footprint_level(
                        &symbol,
                        timestamp,
                        price_level,
                        buy_volume,
                        sell_volume,
                        trade_count,
                    ) {
                        tracing::warn!(symbol = %symbol, error = %e, "Footprint write failed");
                    }
                }
                StoreMessage::DailyTrade {
                    symbol,
                    date,
                    price_level,
                    volume,
                    buy_volume,
                    sell_volume,
                    notional,
                } => {
                    if let Err(e) = store.upsert_daily_trade(
                        &symbol,
                        date,
                        price_level,
                        volume,
                        buy_volume,
                        sell_volume,
                        notional,
                    ) {
                        tracing::warn!(symbol = %symbol, error = %e, "Daily trade write failed");
                    }
                }
                StoreMessage::SessionLevel {
                    symbol,
                    date,
                    session,
                    price,
                    timestamp,
                    volume,
                } => {
                    if let Err(e) =
                        store.upsert_session_level(&symbol, date, session, price, timestamp, volume)
                    {
                        tracing::warn!(symbol = %symbol, error = %e, "Session level write failed");
                    }
                }
                StoreMessage::VwapIncrement {
                    symbol,
                    date,
                    pv,
                    volume,
                    timestamp,
                } => {
                    if let Err(e) = store.add_vwap(&symbol, date, pv, volume, timestamp) {
                        tracing::warn!(symbol = %symbol, error = %e, "VWAP write failed");
                    }
                }
                StoreMessage::OiSnapshot {
                    symbol,
                    timestamp,
                    open_interest,
                    open_interest_value,
                } => {
                    if let Err(e) =
                        store.save_oi_snapshot(&symbol, timestamp, open_interest, open_interest_value)
                    {
                        tracing::warn!(symbol = %symbol, error = %e, "OI snapshot write failed");
                    }
                }
                StoreMessage::DepthDelta {
                    symbol,
                    timestamp,
                    percent_range,
                    mid_price,
                    bid_volume,
                    ask_volume,
                    net_volume,
                } => {
                    if let Err(e) = store.save_depth_delta(
                        &symbol,
                        timestamp,
                        percent_range,
                        mid_price,
                        bid_volume,
                        ask_volume,
                        net_volume,
                    ) {
                        tracing::warn!(symbol = %symbol, error = %e, "Depth delta write failed");
                    }
                }
                StoreMessage::Liquidation(liq) => {
                    if let Err(e) = store.save_liquidation(&liq) {
                        tracing::warn!(symbol = %liq.symbol, error = %e, "Liquidation write failed");
                    }
                }
                StoreMessage::Cleanup { cutoff_ms } => match store.cleanup_older_than(cutoff_ms) {
                    Ok(deleted) => {
                        tracing::info!(deleted, cutoff_ms, "Retention sweep complete");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Retention sweep failed");
                    }
                },
                StoreMessage::Flush(done) => {
                    let _ = done.send(());
                }
                StoreMessage::Shutdown(done) => {
                    let _ = done.send(());
                    tracing::info!("Store writer shutting down");
                    return;
                }
            }
        }
    }
}
