// Library exports for orderflow-provider

pub mod error;

pub mod transport; // MCP transport layer (HTTP + SSE)

// Binance futures integration modules
pub mod binance; // REST + WebSocket clients
pub mod config; // Configuration management

pub mod market; // Canonical market records and live caches
pub mod orderbook; // Snapshot + diff orderbook synchronizer

pub mod indicators; // Streaming orderflow indicator engines

pub mod storage; // SQLite write-behind store
pub mod supervisor; // Stream lifecycle and periodic tasks
pub mod tools; // MCP tool registry and dispatch

pub mod util; // Time and tick utilities
