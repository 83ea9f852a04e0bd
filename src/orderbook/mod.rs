//! Orderbook synchronization
//!
//! Maintains a sorted L2 book per symbol from a REST snapshot plus the
//! `@depth@100ms` diff stream, validated by the futures sequence protocol
//! (`pu` chaining). Queries fail fast while a book is unsynced.

pub mod book;
pub mod sync;

pub use book::{DepthWithin, OrderBook};
pub use sync::OrderBookManager;
