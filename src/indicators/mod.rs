//! Streaming orderflow indicator engines
//!
//! Each engine owns its per-symbol state behind its own lock and implements
//! the subset of capabilities it needs. The trade aggregator holds the
//! [`TradeSink`] list and dispatches every trade exactly once per engine;
//! the day-rollover timer drives [`TradeSink::on_rollover`].

pub mod aggregator;
pub mod delta;
pub mod depth_delta;
pub mod footprint;
pub mod imbalance;
pub mod session_levels;
pub mod volume_profile;
pub mod vwap;

use crate::market::Trade;
use async_trait::async_trait;

/// Capability implemented by every engine that consumes the trade stream
///
/// `on_rollover` is the scheduled UTC-day reset; engines must also detect
/// the day change lazily on write, so the timer is an optimization rather
/// than a correctness requirement.
#[async_trait]
pub trait TradeSink: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Observe one trade (called exactly once per trade)
    async fn on_trade(&self, trade: &Trade);

    /// Scheduled UTC-day rollover at `day_start` (milliseconds)
    async fn on_rollover(&self, day_start: i64);
}
