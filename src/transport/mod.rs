//! MCP transport layer
//!
//! Streamable HTTP transport with JSON-RPC 2.0 on `POST /mcp`, an SSE
//! event stream on `GET /sse`, and a plain health endpoint.

pub mod http;
pub mod jsonrpc;

pub use http::start_http_server;
