//! Supervisor and application wiring
//!
//! Builds the component graph, starts the WebSocket stream and the
//! periodic tasks (depth sampler, day-rollover timer, retention sweep,
//! open-interest poller), and owns graceful shutdown: cancel tasks, flush
//! outstanding bars, drain the store writer.

use crate::binance::client::FuturesRestClient;
use crate::binance::websocket::{MarketEvent, MarketStream};
use crate::config::Settings;
use crate::error::Result;
use crate::indicators::aggregator::TradeAggregator;
use crate::indicators::delta::DeltaCvdEngine;
use crate::indicators::depth_delta::{DepthDeltaTracker, DepthSnapshot};
use crate::indicators::imbalance::ImbalanceDetector;
use crate::indicators::session_levels::SessionLevelEngine;
use crate::indicators::volume_profile::VolumeProfileEngine;
use crate::indicators::vwap::VwapEngine;
use crate::indicators::TradeSink;
use crate::market::cache::MarkPriceCache;
use crate::market::liquidations::LiquidationCache;
use crate::market::{Liquidation, Trade};
use crate::orderbook::OrderBookManager;
use crate::storage::{SqliteStore, StoreMessage, StoreWriter};
use crate::util::time::{day_start_ms, now_ms, MS_PER_DAY};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Hard bound on undispatched stream events; beyond it the oldest are
/// dropped with a warning
const EVENT_QUEUE_BOUND: usize = 100_000;

/// Open-interest poll interval
const OI_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Retention sweep interval
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Shared handles to every long-lived component
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub rest: Arc<FuturesRestClient>,
    pub orderbooks: Arc<OrderBookManager>,
    pub aggregator: Arc<TradeAggregator>,
    pub vwap: Arc<VwapEngine>,
    pub volume_profile: Arc<VolumeProfileEngine>,
    pub sessions: Arc<SessionLevelEngine>,
    pub delta_cvd: Arc<DeltaCvdEngine>,
    pub imbalance: ImbalanceDetector,
    pub depth_tracker: Arc<DepthDeltaTracker>,
    pub liquidations: Arc<LiquidationCache>,
    pub mark_prices: Arc<MarkPriceCache>,
    pub store: Arc<SqliteStore>,
    pub writer: StoreWriter,
    pub started_at: i64,
}

impl AppContext {
    /// Build every component from settings
    pub fn initialize(settings: Settings) -> Result<Arc<Self>> {
        let settings = Arc::new(settings);
        let store = Arc::new(SqliteStore::open(&settings.cache_db_path)?);
        let writer = StoreWriter::spawn(Arc::clone(&store));

        let rest = Arc::new(FuturesRestClient::new(
            settings.binance_rest_url.clone(),
            settings.rest_rate_limit_per_min,
        ));
        let orderbooks = OrderBookManager::new(
            Arc::clone(&rest),
            settings.orderbook_snapshot_limit,
        );

        let vwap = Arc::new(VwapEngine::new(writer.clone()));
        let volume_profile = Arc::new(VolumeProfileEngine::new(
            Arc::clone(&settings),
            writer.clone(),
        ));
        let sessions = Arc::new(SessionLevelEngine::new(
            Arc::clone(&settings),
            writer.clone(),
        ));
        let delta_cvd = Arc::new(DeltaCvdEngine::new(settings.cvd_reset_on_rollover));

        let sinks: Vec<Arc<dyn TradeSink>> = vec![
            Arc::clone(&vwap) as Arc<dyn TradeSink>,
            Arc::clone(&volume_profile) as Arc<dyn TradeSink>,
            Arc::clone(&sessions) as Arc<dyn TradeSink>,
            Arc::clone(&delta_cvd) as Arc<dyn TradeSink>,
        ];

        let aggregator = Arc::new(TradeAggregator::new(
            Arc::clone(&settings),
            sinks,
            writer.clone(),
        ));

        let imbalance = ImbalanceDetector::new(
            settings.imbalance_ratio_threshold,
            settings.imbalance_consecutive_levels,
        );

        Ok(Arc::new(Self {
            imbalance,
            depth_tracker: Arc::new(DepthDeltaTracker::new()),
            liquidations: Arc::new(LiquidationCache::new(settings.liquidation_cache_size)),
            mark_prices: Arc::new(MarkPriceCache::new()),
            rest,
            orderbooks,
            aggregator,
            vwap,
            volume_profile,
            sessions,
            delta_cvd,
            store,
            writer,
            started_at: now_ms(),
            settings,
        }))
    }

    /// Engines with a UTC-day lifecycle, in dispatch order
    fn rollover_sinks(&self) -> Vec<Arc<dyn TradeSink>> {
        vec![
            Arc::clone(&self.vwap) as Arc<dyn TradeSink>,
            Arc::clone(&self.volume_profile) as Arc<dyn TradeSink>,
            Arc::clone(&self.sessions) as Arc<dyn TradeSink>,
            Arc::clone(&self.delta_cvd) as Arc<dyn TradeSink>,
        ]
    }
}

/// Owns the background task handles and the shutdown signal
pub struct Supervisor {
    ctx: Arc<AppContext>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Start the stream reader, dispatcher and periodic tasks
    pub fn start(ctx: Arc<AppContext>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(8);
        let mut handles = Vec::new();

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // WebSocket reader over the combined stream
        let stream = MarketStream::new(
            ctx.settings.binance_ws_url.clone(),
            MarketStream::subtopics_for(&ctx.settings.symbols),
            ctx.settings.ws_reconnect_delay,
            ctx.settings.ws_max_reconnect_attempts,
        );
        let stream_shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = stream.run(event_tx, stream_shutdown).await {
                tracing::error!(error = %e, "Market stream terminated");
            }
        }));

        // Event dispatcher
        handles.push(tokio::spawn(dispatch_loop(
            Arc::clone(&ctx),
            event_rx,
            shutdown_tx.subscribe(),
        )));

        // Depth-delta sampler
        handles.push(tokio::spawn(depth_sampler_loop(
            Arc::clone(&ctx),
            shutdown_tx.subscribe(),
        )));

        // UTC-day rollover timer
        handles.push(tokio::spawn(rollover_loop(
            Arc::clone(&ctx),
            shutdown_tx.subscribe(),
        )));

        // Hourly retention sweep
        handles.push(tokio::spawn(retention_loop(
            Arc::clone(&ctx),
            shutdown_tx.subscribe(),
        )));

        // Open-interest poller
        handles.push(tokio::spawn(oi_poll_loop(
            Arc::clone(&ctx),
            shutdown_tx.subscribe(),
        )));

        // Periodic orderbook resync
        handles.push(tokio::spawn(resync_loop(
            Arc::clone(&ctx),
            shutdown_tx.subscribe(),
        )));

        // One-shot indicator warmup from recent trade history
        let warmup_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            warmup_from_history(&warmup_ctx).await;
        });

        tracing::info!(
            symbols = ?ctx.settings.symbols,
            "Supervisor started"
        );

        Self {
            ctx,
            shutdown_tx,
            handles,
        }
    }

    /// Signal every task, flush outstanding state, drain the writer
    pub async fn shutdown(self) {
        tracing::info!("Shutting down supervisor");
        let _ = self.shutdown_tx.send(());

        for handle in self.handles {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                tracing::warn!("Task did not stop within 5s");
            }
        }

        self.ctx.aggregator.flush().await;
        self.ctx.writer.shutdown().await;
        tracing::info!("Supervisor stopped");
    }
}

/// Pull events off the queue and route them to their consumers
///
/// Trades from one symbol arrive and dispatch in order; when the queue
/// exceeds its hard bound the oldest undispatched events are dropped.
async fn dispatch_loop(
    ctx: Arc<AppContext>,
    mut rx: mpsc::UnboundedReceiver<MarketEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => {
                    tracing::info!("Event channel closed, dispatcher stopping");
                    return;
                }
            },
            _ = shutdown.recv() => {
                tracing::info!("Dispatcher received shutdown");
                return;
            }
        };

        // Overflow policy: drop the oldest queued events, keep the newest
        let mut event = event;
        while rx.len() > EVENT_QUEUE_BOUND {
            tracing::warn!(
                queued = rx.len(),
                symbol = event.symbol(),
                "Event queue over bound, dropping oldest"
            );
            event = match rx.recv().await {
                Some(next) => next,
                None => return,
            };
        }

        match event {
            MarketEvent::Trade(raw) => match Trade::from_event(&raw) {
                Ok(trade) => ctx.aggregator.process_trade(&trade).await,
                Err(e) => {
                    tracing::warn!(symbol = %raw.symbol, error = %e, "Rejected trade event");
                }
            },
            MarketEvent::Depth(update) => {
                ctx.orderbooks.process_depth_update(update).await;
            }
            MarketEvent::MarkPrice(event) => {
                ctx.mark_prices.update(&event).await;
            }
            MarketEvent::ForceOrder(event) => match Liquidation::from_detail(&event.order) {
                Ok(liq) => {
                    ctx.writer.send(StoreMessage::Liquidation(liq.clone()));
                    ctx.liquidations.add(liq).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected liquidation event");
                }
            },
        }
    }
}

/// Sample depth within the configured band for every synced book
async fn depth_sampler_loop(ctx: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(ctx.settings.depth_snapshot_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => {
                tracing::info!("Depth sampler stopping");
                return;
            }
        }

        let percent = ctx.settings.orderbook_depth_percent;
        for symbol in &ctx.settings.symbols {
            match ctx.orderbooks.depth_within(symbol, percent).await {
                Ok(depth) => {
                    let snapshot = DepthSnapshot::from_depth(&depth, now_ms());
                    ctx.writer.send(StoreMessage::DepthDelta {
                        symbol: symbol.clone(),
                        timestamp: snapshot.timestamp,
                        percent_range: snapshot.percent_range,
                        mid_price: snapshot.mid_price,
                        bid_volume: snapshot.bid_volume,
                        ask_volume: snapshot.ask_volume,
                        net_volume: snapshot.net_volume,
                    });
                    ctx.depth_tracker.record(symbol, snapshot).await;
                }
                Err(e) => {
                    tracing::debug!(symbol = %symbol, error = %e, "Skipping depth sample");
                }
            }
        }
    }
}

/// Fire the engine rollover at each UTC-day boundary
///
/// The engines also roll lazily on write, so this timer only guarantees
/// the reset happens promptly on quiet markets.
async fn rollover_loop(ctx: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let now = now_ms();
        let next_day = day_start_ms(now) + MS_PER_DAY;
        let wait = Duration::from_millis((next_day - now).max(0) as u64);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.recv() => {
                tracing::info!("Rollover timer stopping");
                return;
            }
        }

        tracing::info!(day_start = next_day, "UTC day rollover");
        for sink in ctx.rollover_sinks() {
            sink.on_rollover(next_day).await;
        }
    }
}

/// Hourly deletion of rows older than the retention window
async fn retention_loop(ctx: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => {
                tracing::info!("Retention sweeper stopping");
                return;
            }
        }

        let cutoff = now_ms() - ctx.settings.data_retention_days * MS_PER_DAY;
        ctx.writer.send(StoreMessage::Cleanup { cutoff_ms: cutoff });
    }
}

/// Seed the indicator engines with recent aggregated trades
///
/// Runs once at startup so VWAP, profile and footprint queries have data
/// before the live stream has accumulated any. The trades flow through
/// the normal aggregator fan-out in timestamp order.
async fn warmup_from_history(ctx: &AppContext) {
    for symbol in &ctx.settings.symbols {
        match ctx.rest.get_agg_trades(symbol, None, None, 1000).await {
            Ok(rows) => {
                let mut fed = 0usize;
                for row in &rows {
                    match Trade::from_rest(symbol, row) {
                        Ok(trade) => {
                            ctx.aggregator.process_trade(&trade).await;
                            fed += 1;
                        }
                        Err(e) => {
                            tracing::warn!(symbol = %symbol, error = %e, "Skipping warmup trade");
                        }
                    }
                }
                tracing::info!(symbol = %symbol, trades = fed, "Indicator warmup complete");
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Warmup trade fetch failed");
            }
        }
    }
}

/// Scheduled full resync of every tracked book
async fn resync_loop(ctx: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(ctx.settings.orderbook_resync_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick; books bootstrap from the stream
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => {
                tracing::info!("Resync timer stopping");
                return;
            }
        }

        for symbol in &ctx.settings.symbols {
            tracing::info!(symbol = %symbol, "Scheduled orderbook resync");
            ctx.orderbooks.request_resync(symbol).await;
        }
    }
}

/// Periodic open-interest snapshot per symbol
async fn oi_poll_loop(ctx: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(OI_POLL_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => {
                tracing::info!("Open-interest poller stopping");
                return;
            }
        }

        for symbol in &ctx.settings.symbols {
            match ctx.rest.get_open_interest(symbol).await {
                Ok(oi) => {
                    let open_interest =
                        Decimal::from_str(&oi.open_interest).unwrap_or(Decimal::ZERO);
                    let value = ctx
                        .mark_prices
                        .get(symbol)
                        .await
                        .map(|info| info.mark_price * open_interest);
                    ctx.writer.send(StoreMessage::OiSnapshot {
                        symbol: symbol.clone(),
                        timestamp: oi.time,
                        open_interest,
                        open_interest_value: value,
                    });
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Open-interest poll failed");
                }
            }
        }
    }
}
