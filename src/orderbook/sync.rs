//! Orderbook synchronizer
//!
//! Implements the futures snapshot + diff protocol per symbol:
//!
//! 1. Buffer incoming diffs while unsynced.
//! 2. Fetch a REST snapshot with `lastUpdateId = S`.
//! 3. Discard buffered diffs with `u <= S`.
//! 4. The bridging diff must satisfy `U <= S+1 <= u`; apply it and mark the
//!    book synced.
//! 5. Every further diff must chain with `pu == lastUpdateId`; a mismatch
//!    is a gap and triggers a re-bootstrap while diffs keep buffering.
//!
//! Queries return `NotReady` while a book is unsynced; there are no stale
//! reads.

use crate::binance::client::FuturesRestClient;
use crate::binance::types::{DepthSnapshotResponse, DepthUpdateEvent};
use crate::error::{OrderflowError, Result};
use crate::orderbook::book::{DepthWithin, OrderBook};
use crate::util::time::now_ms;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Hard bound on buffered diffs per symbol while unsynced
const PENDING_BUFFER_LIMIT: usize = 10_000;

/// Maximum back-off between snapshot fetch attempts
const BOOTSTRAP_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Outcome of applying one diff to a synced book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyOutcome {
    Applied,
    /// `u <= lastUpdateId`: already covered by the snapshot, ignore
    Stale,
    /// Chain broken, book must re-bootstrap
    Gap,
}

/// Per-symbol synchronizer state
struct BookState {
    book: OrderBook,
    /// Diffs buffered while unsynced, oldest first
    pending: VecDeque<DepthUpdateEvent>,
    /// Snapshot installed but the bridging diff not yet seen
    awaiting_bridge: bool,
    /// A bootstrap task is currently in flight
    bootstrapping: bool,
}

impl BookState {
    fn new(symbol: &str) -> Self {
        Self {
            book: OrderBook::new(symbol.to_uppercase()),
            pending: VecDeque::new(),
            awaiting_bridge: false,
            bootstrapping: false,
        }
    }

    fn buffer(&mut self, update: DepthUpdateEvent) {
        if self.pending.len() >= PENDING_BUFFER_LIMIT {
            tracing::warn!(
                symbol = %self.book.symbol,
                "Pending diff buffer full, dropping oldest"
            );
            self.pending.pop_front();
        }
        self.pending.push_back(update);
    }

    /// Install snapshot levels, discarding zero quantities
    fn install_snapshot(&mut self, snapshot: &DepthSnapshotResponse) -> Result<()> {
        let mut book = OrderBook::new(self.book.symbol.clone());

        for [price_str, qty_str] in &snapshot.bids {
            let (price, qty) = parse_level(price_str, qty_str)?;
            book.update_bid(price, qty);
        }
        for [price_str, qty_str] in &snapshot.asks {
            let (price, qty) = parse_level(price_str, qty_str)?;
            book.update_ask(price, qty);
        }

        book.last_update_id = snapshot.last_update_id;
        book.last_update_time = if snapshot.event_time > 0 {
            snapshot.event_time
        } else {
            now_ms()
        };
        book.synced = false;

        self.book = book;
        self.awaiting_bridge = true;
        Ok(())
    }

    /// Apply a diff to a book that has at least a snapshot installed
    fn try_apply(&mut self, update: &DepthUpdateEvent) -> Result<ApplyOutcome> {
        let last_id = self.book.last_update_id;

        // Already covered by the snapshot or an earlier diff
        if update.final_update_id <= last_id {
            return Ok(ApplyOutcome::Stale);
        }

        if self.awaiting_bridge {
            // Bridge rule: U <= S+1 <= u
            if update.first_update_id > last_id + 1 {
                tracing::warn!(
                    symbol = %self.book.symbol,
                    expected = last_id + 1,
                    got_first = update.first_update_id,
                    "Bridging diff missing, snapshot is stale"
                );
                return Ok(ApplyOutcome::Gap);
            }
        } else if update.prev_final_update_id != last_id {
            // Chained diffs must reference the previous event's u
            tracing::warn!(
                symbol = %self.book.symbol,
                expected_pu = last_id,
                got_pu = update.prev_final_update_id,
                "Depth diff chain broken"
            );
            return Ok(ApplyOutcome::Gap);
        }

        for [price_str, qty_str] in &update.bids {
            let (price, qty) = parse_level(price_str, qty_str)?;
            self.book.update_bid(price, qty);
        }
        for [price_str, qty_str] in &update.asks {
            let (price, qty) = parse_level(price_str, qty_str)?;
            self.book.update_ask(price, qty);
        }

        self.book.last_update_id = update.final_update_id;
        self.book.last_update_time = update.event_time;

        if self.book.is_crossed() {
            tracing::error!(
                symbol = %self.book.symbol,
                best_bid = ?self.book.best_bid(),
                best_ask = ?self.book.best_ask(),
                "Crossed orderbook after diff, forcing resync"
            );
            return Ok(ApplyOutcome::Gap);
        }

        if self.awaiting_bridge {
            self.awaiting_bridge = false;
            self.book.synced = true;
            tracing::info!(
                symbol = %self.book.symbol,
                update_id = self.book.last_update_id,
                "Orderbook synced"
            );
        }

        Ok(ApplyOutcome::Applied)
    }

    /// Drain the pending buffer after a snapshot install
    ///
    /// Returns false when a gap inside the buffer requires a fresh
    /// snapshot.
    fn drain_pending(&mut self) -> bool {
        while let Some(update) = self.pending.pop_front() {
            match self.try_apply(&update) {
                Ok(ApplyOutcome::Applied) | Ok(ApplyOutcome::Stale) => {}
                Ok(ApplyOutcome::Gap) => {
                    // Keep the offending diff for the next attempt
                    self.pending.push_front(update);
                    self.mark_unsynced();
                    return false;
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = %self.book.symbol,
                        error = %e,
                        "Skipping unparseable buffered diff"
                    );
                }
            }
        }
        true
    }

    fn mark_unsynced(&mut self) {
        self.book.synced = false;
        self.awaiting_bridge = false;
    }
}

fn parse_level(price_str: &str, qty_str: &str) -> Result<(Decimal, Decimal)> {
    let price = Decimal::from_str(price_str)
        .map_err(|e| OrderflowError::Parse(format!("Invalid depth price: {}", e)))?;
    let qty = Decimal::from_str(qty_str)
        .map_err(|e| OrderflowError::Parse(format!("Invalid depth qty: {}", e)))?;
    if qty < Decimal::ZERO {
        return Err(OrderflowError::Integrity(format!(
            "Negative depth quantity: {}",
            qty
        )));
    }
    Ok((price, qty))
}

/// Serializable point-in-time book view for tool responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    pub symbol: String,
    pub last_update_id: i64,
    pub last_update_time: i64,
    pub synced: bool,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// Manages one synchronized orderbook per subscribed symbol
pub struct OrderBookManager {
    states: RwLock<HashMap<String, BookState>>,
    rest: Arc<FuturesRestClient>,
    snapshot_limit: u32,
    /// Self-handle for spawning bootstrap tasks
    weak_self: std::sync::Weak<OrderBookManager>,
}

impl OrderBookManager {
    pub fn new(rest: Arc<FuturesRestClient>, snapshot_limit: u32) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            states: RwLock::new(HashMap::new()),
            rest,
            snapshot_limit,
            weak_self: weak.clone(),
        })
    }

    /// Process one depth diff from the stream
    ///
    /// Unsynced books buffer the diff and (once) kick off a bootstrap task;
    /// synced books apply it directly, falling back to re-bootstrap on any
    /// sequence gap.
    pub async fn process_depth_update(&self, update: DepthUpdateEvent) {
        let symbol = update.symbol.to_uppercase();
        let mut needs_bootstrap = false;

        {
            let mut states = self.states.write().await;
            let state = states
                .entry(symbol.clone())
                .or_insert_with(|| BookState::new(&symbol));

            if !state.book.synced && !state.awaiting_bridge {
                state.buffer(update);
                if !state.bootstrapping {
                    state.bootstrapping = true;
                    needs_bootstrap = true;
                }
            } else {
                match state.try_apply(&update) {
                    Ok(ApplyOutcome::Applied) | Ok(ApplyOutcome::Stale) => {}
                    Ok(ApplyOutcome::Gap) => {
                        state.mark_unsynced();
                        state.buffer(update);
                        if !state.bootstrapping {
                            state.bootstrapping = true;
                            needs_bootstrap = true;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(symbol = %symbol, error = %e, "Skipping bad depth diff");
                    }
                }
            }
        }

        if needs_bootstrap {
            if let Some(manager) = self.weak_self.upgrade() {
                tokio::spawn(async move {
                    manager.bootstrap(symbol).await;
                });
            }
        }
    }

    /// Fetch a snapshot and bridge the buffered diffs, retrying with capped
    /// back-off (plus a little clock-derived jitter) until synced
    async fn bootstrap(self: Arc<Self>, symbol: String) {
        let mut attempt = 0u32;

        loop {
            tracing::info!(symbol = %symbol, attempt, "Bootstrapping orderbook");

            match self
                .rest
                .get_depth_snapshot(&symbol, self.snapshot_limit)
                .await
            {
                Ok(snapshot) => {
                    if self.apply_snapshot(&symbol, &snapshot).await {
                        return;
                    }
                    // Buffered diffs were ahead of this snapshot; fetch a
                    // fresh one immediately
                    tracing::warn!(symbol = %symbol, "Snapshot unusable, refetching");
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Snapshot fetch failed");
                }
            }

            attempt += 1;
            let backoff = Duration::from_secs(1u64 << attempt.min(5));
            let jitter = Duration::from_millis((now_ms() % 500) as u64);
            tokio::time::sleep(backoff.min(BOOTSTRAP_MAX_BACKOFF) + jitter).await;
        }
    }

    /// Install a snapshot and drain the pending buffer
    ///
    /// Returns true when the book ends in a consistent state (synced, or
    /// cleanly awaiting its bridge diff from the live stream). Public so
    /// the protocol is drivable without a network in tests.
    pub async fn apply_snapshot(&self, symbol: &str, snapshot: &DepthSnapshotResponse) -> bool {
        let symbol = symbol.to_uppercase();
        let mut states = self.states.write().await;
        let state = states
            .entry(symbol.clone())
            .or_insert_with(|| BookState::new(&symbol));

        if let Err(e) = state.install_snapshot(snapshot) {
            tracing::error!(symbol = %symbol, error = %e, "Snapshot rejected");
            state.mark_unsynced();
            return false;
        }

        let ok = state.drain_pending();
        if ok {
            state.bootstrapping = false;
            tracing::info!(
                symbol = %symbol,
                update_id = state.book.last_update_id,
                bid_levels = state.book.bids.len(),
                ask_levels = state.book.asks.len(),
                synced = state.book.synced,
                "Snapshot installed"
            );
        }
        ok
    }

    /// Force a fresh snapshot for a symbol
    ///
    /// Used by the periodic resync timer to clear any accumulated drift.
    /// The book drops out of sync (queries fail fast) until the new
    /// snapshot bridges.
    pub async fn request_resync(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        {
            let mut states = self.states.write().await;
            let state = states
                .entry(symbol.clone())
                .or_insert_with(|| BookState::new(&symbol));
            if state.bootstrapping {
                return;
            }
            state.mark_unsynced();
            state.bootstrapping = true;
        }

        if let Some(manager) = self.weak_self.upgrade() {
            tokio::spawn(async move {
                manager.bootstrap(symbol).await;
            });
        }
    }

    /// Whether the symbol's book is currently synced
    pub async fn is_synced(&self, symbol: &str) -> bool {
        self.states
            .read()
            .await
            .get(&symbol.to_uppercase())
            .map_or(false, |s| s.book.synced)
    }

    /// Best bid and ask; `NotReady` while unsynced
    pub async fn best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal)> {
        let states = self.states.read().await;
        let book = synced_book(&states, symbol)?;
        match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => Ok((bid, ask)),
            _ => Err(OrderflowError::NotReady(format!(
                "Orderbook for {} is empty",
                symbol
            ))),
        }
    }

    /// Mid price; `NotReady` while unsynced
    pub async fn mid_price(&self, symbol: &str) -> Result<Decimal> {
        let (bid, ask) = self.best_bid_ask(symbol).await?;
        Ok((bid + ask) / Decimal::TWO)
    }

    /// Aggregate depth within a percent band; `NotReady` while unsynced
    pub async fn depth_within(&self, symbol: &str, percent: Decimal) -> Result<DepthWithin> {
        let states = self.states.read().await;
        let book = synced_book(&states, symbol)?;
        book.depth_within(percent).ok_or_else(|| {
            OrderflowError::NotReady(format!("Orderbook for {} is empty", symbol))
        })
    }

    /// Point-in-time view of the top of the book
    pub async fn book_view(&self, symbol: &str, depth: usize) -> Result<BookView> {
        let states = self.states.read().await;
        let book = synced_book(&states, symbol)?;
        let (bids, asks) = book.top_levels(depth);

        Ok(BookView {
            symbol: book.symbol.clone(),
            last_update_id: book.last_update_id,
            last_update_time: book.last_update_time,
            synced: book.synced,
            bids: bids
                .into_iter()
                .map(|(p, q)| [p.to_string(), q.to_string()])
                .collect(),
            asks: asks
                .into_iter()
                .map(|(p, q)| [p.to_string(), q.to_string()])
                .collect(),
        })
    }

    /// Sync status per tracked symbol, for health reporting
    pub async fn sync_status(&self) -> HashMap<String, bool> {
        self.states
            .read()
            .await
            .iter()
            .map(|(symbol, state)| (symbol.clone(), state.book.synced))
            .collect()
    }
}

fn synced_book<'a>(
    states: &'a HashMap<String, BookState>,
    symbol: &str,
) -> Result<&'a OrderBook> {
    let state = states.get(&symbol.to_uppercase()).ok_or_else(|| {
        OrderflowError::NotReady(format!("No orderbook tracked for {}", symbol))
    })?;
    if !state.book.synced {
        return Err(OrderflowError::NotReady(format!(
            "Orderbook for {} is not synced",
            symbol
        )));
    }
    Ok(&state.book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn snapshot(last_update_id: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthSnapshotResponse {
        DepthSnapshotResponse {
            last_update_id,
            event_time: 1_000,
            bids: bids
                .iter()
                .map(|(p, q)| [p.to_string(), q.to_string()])
                .collect(),
            asks: asks
                .iter()
                .map(|(p, q)| [p.to_string(), q.to_string()])
                .collect(),
        }
    }

    fn diff(
        first: i64,
        last: i64,
        prev: i64,
        bids: &[(&str, &str)],
        asks: &[(&str, &str)],
    ) -> DepthUpdateEvent {
        DepthUpdateEvent {
            event_type: "depthUpdate".into(),
            event_time: 2_000,
            transaction_time: 2_000,
            symbol: "BTCUSDT".into(),
            first_update_id: first,
            final_update_id: last,
            prev_final_update_id: prev,
            bids: bids
                .iter()
                .map(|(p, q)| [p.to_string(), q.to_string()])
                .collect(),
            asks: asks
                .iter()
                .map(|(p, q)| [p.to_string(), q.to_string()])
                .collect(),
        }
    }

    #[test]
    fn test_bridge_and_chain() {
        let mut state = BookState::new("BTCUSDT");
        state
            .install_snapshot(&snapshot(100, &[("50000", "1.0")], &[("50001", "1.0")]))
            .unwrap();
        assert!(!state.book.synced);

        // Stale diff entirely covered by the snapshot
        assert_eq!(
            state.try_apply(&diff(99, 99, 98, &[], &[])).unwrap(),
            ApplyOutcome::Stale
        );

        // Bridging diff: U(100) <= S+1(101) <= u(102)
        assert_eq!(
            state
                .try_apply(&diff(100, 102, 99, &[("50000", "1.5")], &[("50001", "0")]))
                .unwrap(),
            ApplyOutcome::Applied
        );
        assert!(state.book.synced);

        // Chained diff: pu must equal previous u
        assert_eq!(
            state
                .try_apply(&diff(103, 103, 102, &[("49999", "2.0")], &[]))
                .unwrap(),
            ApplyOutcome::Applied
        );

        assert_eq!(state.book.last_update_id, 103);
        assert_eq!(
            state.book.bids.get(&Decimal::from(50000)).copied(),
            Some(Decimal::from_str("1.5").unwrap())
        );
        assert_eq!(
            state.book.bids.get(&Decimal::from(49999)).copied(),
            Some(Decimal::from(2))
        );
        assert!(state.book.asks.is_empty());
    }

    #[test]
    fn test_chain_mismatch_is_gap() {
        let mut state = BookState::new("BTCUSDT");
        state
            .install_snapshot(&snapshot(100, &[("50000", "1.0")], &[("50001", "1.0")]))
            .unwrap();
        state
            .try_apply(&diff(100, 102, 99, &[], &[]))
            .unwrap();

        // pu(110) != last u(102)
        assert_eq!(
            state.try_apply(&diff(111, 112, 110, &[], &[])).unwrap(),
            ApplyOutcome::Gap
        );
    }

    #[test]
    fn test_missing_bridge_is_gap() {
        let mut state = BookState::new("BTCUSDT");
        state
            .install_snapshot(&snapshot(100, &[("50000", "1.0")], &[("50001", "1.0")]))
            .unwrap();

        // First diff starts past S+1
        assert_eq!(
            state.try_apply(&diff(105, 106, 104, &[], &[])).unwrap(),
            ApplyOutcome::Gap
        );
    }

    #[test]
    fn test_crossed_book_is_gap() {
        let mut state = BookState::new("BTCUSDT");
        state
            .install_snapshot(&snapshot(100, &[("50000", "1.0")], &[("50001", "1.0")]))
            .unwrap();

        // Bridge applies an ask at/below the best bid
        assert_eq!(
            state
                .try_apply(&diff(100, 102, 99, &[], &[("49999", "1.0")]))
                .unwrap(),
            ApplyOutcome::Gap
        );
    }

    #[test]
    fn test_drain_discards_stale_then_bridges() {
        let mut state = BookState::new("BTCUSDT");
        state.buffer(diff(99, 99, 98, &[], &[]));
        state.buffer(diff(100, 102, 99, &[("50000", "1.5")], &[("50001", "0")]));
        state.buffer(diff(103, 103, 102, &[("49999", "2.0")], &[]));

        state
            .install_snapshot(&snapshot(100, &[("50000", "1.0")], &[("50001", "1.0")]))
            .unwrap();
        assert!(state.drain_pending());
        assert!(state.book.synced);
        assert_eq!(state.book.last_update_id, 103);
    }

    #[test]
    fn test_drain_gap_requests_restart() {
        let mut state = BookState::new("BTCUSDT");
        // Buffered diffs start well past the snapshot's bridge window
        state.buffer(diff(200, 201, 199, &[], &[]));

        state
            .install_snapshot(&snapshot(100, &[("50000", "1.0")], &[("50001", "1.0")]))
            .unwrap();
        assert!(!state.drain_pending());
        assert!(!state.book.synced);
        // The offending diff is retained for the next snapshot
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_pending_buffer_bounded() {
        let mut state = BookState::new("BTCUSDT");
        for i in 0..(PENDING_BUFFER_LIMIT + 10) {
            state.buffer(diff(i as i64, i as i64, i as i64 - 1, &[], &[]));
        }
        assert_eq!(state.pending.len(), PENDING_BUFFER_LIMIT);
    }
}
