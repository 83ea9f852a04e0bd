//! Depth-delta tracker
//!
//! The supervisor's sampler task reads the synced orderbook every interval
//! and records a [`DepthSnapshot`] here; consecutive snapshots produce a
//! componentwise [`DepthDelta`]. Tool reads always return the most recently
//! *sampled* snapshot so the current view and the history tail agree.

use crate::orderbook::book::DepthWithin;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Snapshots (and deltas) retained per symbol
const RING_SIZE: usize = 1000;

/// Depth within a percent band at one sample instant
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub timestamp: i64,
    pub percent_range: Decimal,
    pub mid_price: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    /// bid - ask
    pub net_volume: Decimal,
}

impl DepthSnapshot {
    pub fn from_depth(depth: &DepthWithin, timestamp: i64) -> Self {
        Self {
            timestamp,
            percent_range: depth.percent_range,
            mid_price: depth.mid_price,
            bid_volume: depth.bid_volume,
            ask_volume: depth.ask_volume,
            net_volume: depth.net_volume,
        }
    }
}

/// Componentwise difference of two consecutive snapshots
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthDelta {
    pub timestamp: i64,
    pub bid_delta: Decimal,
    pub ask_delta: Decimal,
    pub net_delta: Decimal,
    pub price_delta: Decimal,
}

/// Aggregate view over a lookback window of deltas
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSummary {
    pub snapshot_count: usize,
    pub avg_net_volume: Decimal,
    pub max_net_volume: Decimal,
    pub min_net_volume: Decimal,
    pub current_net_volume: Decimal,
    pub positive_net_count: usize,
    pub negative_net_count: usize,
    /// "bids", "asks" or "neutral"
    pub dominant_side: &'static str,
}

#[derive(Default)]
struct SymbolRings {
    snapshots: VecDeque<DepthSnapshot>,
    deltas: VecDeque<DepthDelta>,
}

/// Per-symbol snapshot and delta rings
#[derive(Default)]
pub struct DepthDeltaTracker {
    rings: RwLock<HashMap<String, SymbolRings>>,
}

impl DepthDeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sampled snapshot; produces a delta once two samples exist
    pub async fn record(&self, symbol: &str, snapshot: DepthSnapshot) {
        let mut rings = self.rings.write().await;
        let ring = rings.entry(symbol.to_uppercase()).or_default();

        if let Some(previous) = ring.snapshots.back() {
            let delta = DepthDelta {
                timestamp: snapshot.timestamp,
                bid_delta: snapshot.bid_volume - previous.bid_volume,
                ask_delta: snapshot.ask_volume - previous.ask_volume,
                net_delta: snapshot.net_volume - previous.net_volume,
                price_delta: snapshot.mid_price - previous.mid_price,
            };
            if ring.deltas.len() >= RING_SIZE {
                ring.deltas.pop_front();
            }
            ring.deltas.push_back(delta);
        }

        if ring.snapshots.len() >= RING_SIZE {
            ring.snapshots.pop_front();
        }
        ring.snapshots.push_back(snapshot);
    }

    /// Most recently sampled snapshot (never recomputed on read)
    pub async fn latest(&self, symbol: &str) -> Option<DepthSnapshot> {
        self.rings
            .read()
            .await
            .get(&symbol.to_uppercase())
            .and_then(|r| r.snapshots.back().cloned())
    }

    /// Most recent snapshots, oldest first
    pub async fn recent_snapshots(&self, symbol: &str, limit: usize) -> Vec<DepthSnapshot> {
        let rings = self.rings.read().await;
        let Some(ring) = rings.get(&symbol.to_uppercase()) else {
            return Vec::new();
        };
        let skip = ring.snapshots.len().saturating_sub(limit);
        ring.snapshots.iter().skip(skip).cloned().collect()
    }

    /// Most recent deltas, oldest first
    pub async fn recent_deltas(&self, symbol: &str, limit: usize) -> Vec<DepthDelta> {
        let rings = self.rings.read().await;
        let Some(ring) = rings.get(&symbol.to_uppercase()) else {
            return Vec::new();
        };
        let skip = ring.deltas.len().saturating_sub(limit);
        ring.deltas.iter().skip(skip).cloned().collect()
    }

    /// Summary over the last `lookback` snapshots
    pub async fn summary(&self, symbol: &str, lookback: usize) -> Option<DepthSummary> {
        let snapshots = self.recent_snapshots(symbol, lookback).await;
        if snapshots.is_empty() {
            return None;
        }

        let nets: Vec<Decimal> = snapshots.iter().map(|s| s.net_volume).collect();
        let sum: Decimal = nets.iter().copied().sum();
        let avg = sum / Decimal::from(nets.len() as i64);
        let current = *nets.last().expect("non-empty");

        let dominant_side = if avg > Decimal::ZERO {
            "bids"
        } else if avg < Decimal::ZERO {
            "asks"
        } else {
            "neutral"
        };

        Some(DepthSummary {
            snapshot_count: snapshots.len(),
            avg_net_volume: avg,
            max_net_volume: nets.iter().copied().max().expect("non-empty"),
            min_net_volume: nets.iter().copied().min().expect("non-empty"),
            current_net_volume: current,
            positive_net_count: nets.iter().filter(|n| **n > Decimal::ZERO).count(),
            negative_net_count: nets.iter().filter(|n| **n < Decimal::ZERO).count(),
            dominant_side,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn snap(ts: i64, mid: &str, bid: &str, ask: &str) -> DepthSnapshot {
        let bid = dec(bid);
        let ask = dec(ask);
        DepthSnapshot {
            timestamp: ts,
            percent_range: dec("1.0"),
            mid_price: dec(mid),
            bid_volume: bid,
            ask_volume: ask,
            net_volume: bid - ask,
        }
    }

    #[tokio::test]
    async fn test_delta_from_consecutive_snapshots() {
        let tracker = DepthDeltaTracker::new();
        tracker.record("BTCUSDT", snap(1_000, "50000", "10", "8")).await;
        tracker.record("BTCUSDT", snap(6_000, "50010", "12", "7")).await;

        let deltas = tracker.recent_deltas("BTCUSDT", 10).await;
        assert_eq!(deltas.len(), 1);
        let delta = &deltas[0];
        assert_eq!(delta.bid_delta, dec("2"));
        assert_eq!(delta.ask_delta, dec("-1"));
        assert_eq!(delta.net_delta, dec("3"));
        assert_eq!(delta.price_delta, dec("10"));
    }

    #[tokio::test]
    async fn test_latest_agrees_with_history_tail() {
        let tracker = DepthDeltaTracker::new();
        tracker.record("BTCUSDT", snap(1_000, "50000", "10", "8")).await;
        tracker.record("BTCUSDT", snap(6_000, "50010", "12", "7")).await;

        let latest = tracker.latest("BTCUSDT").await.unwrap();
        let history = tracker.recent_snapshots("BTCUSDT", 10).await;
        assert_eq!(latest.timestamp, history.last().unwrap().timestamp);
        assert_eq!(latest.timestamp, 6_000);
    }

    #[tokio::test]
    async fn test_single_snapshot_no_delta() {
        let tracker = DepthDeltaTracker::new();
        tracker.record("BTCUSDT", snap(1_000, "50000", "10", "8")).await;
        assert!(tracker.recent_deltas("BTCUSDT", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_summary_dominant_side() {
        let tracker = DepthDeltaTracker::new();
        tracker.record("BTCUSDT", snap(1_000, "50000", "10", "8")).await;
        tracker.record("BTCUSDT", snap(6_000, "50010", "12", "7")).await;
        tracker.record("BTCUSDT", snap(11_000, "50020", "9", "10")).await;

        let summary = tracker.summary("BTCUSDT", 10).await.unwrap();
        assert_eq!(summary.snapshot_count, 3);
        assert_eq!(summary.positive_net_count, 2);
        assert_eq!(summary.negative_net_count, 1);
        assert_eq!(summary.current_net_volume, dec("-1"));
        assert_eq!(summary.dominant_side, "bids");
    }

    #[tokio::test]
    async fn test_empty_summary_none() {
        let tracker = DepthDeltaTracker::new();
        assert!(tracker.summary("BTCUSDT", 10).await.is_none());
    }
}
