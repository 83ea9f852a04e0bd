//! HTTP transport: JSON-RPC endpoint, SSE stream and health check
//!
//! - `POST /mcp`: initialize, tools/list, tools/call
//! - `GET /sse`: initialization event, then 30-second heartbeats
//! - `GET /healthz`: run state and per-symbol book sync

use crate::supervisor::AppContext;
use crate::tools;
use crate::transport::jsonrpc::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerCapabilities,
    ServerInfo, ToolsCapability,
};
use crate::util::time::now_ms;
use anyhow::Context;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// SSE heartbeat interval
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shared application state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
}

/// Build the router and serve until the shutdown future resolves
pub async fn start_http_server(
    ctx: Arc<AppContext>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.settings.http_host, ctx.settings.http_port)
        .parse()
        .context("Invalid HTTP bind address")?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/mcp", post(handle_jsonrpc))
        .route("/sse", get(handle_sse))
        .route("/healthz", get(handle_healthz))
        .layer(cors)
        .with_state(AppState { ctx });

    tracing::info!(addr = %addr, "HTTP MCP server listening");
    tracing::info!("Endpoint: POST /mcp, GET /sse, GET /healthz");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Main JSON-RPC endpoint handler
pub async fn handle_jsonrpc(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    tracing::debug!(method = %request.method, "Received JSON-RPC request");
    let id = request.id.clone().unwrap_or(Value::Null);

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(initialize_result(), id),
        "tools/list" => {
            let tools = tools::tool_definitions();
            JsonRpcResponse::success(json!({ "tools": tools }), id)
        }
        "tools/call" => handle_tools_call(&state, request.params, id).await,
        other => JsonRpcResponse::error(JsonRpcError::method_not_found(other), id),
    };

    Json(response)
}

fn initialize_result() -> Value {
    let result = InitializeResult {
        protocol_version: "2024-11-05".to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
        },
        server_info: ServerInfo {
            name: "orderflow-provider".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };
    serde_json::to_value(result).unwrap_or_else(|_| json!({}))
}

async fn handle_tools_call(state: &AppState, params: Option<Value>, id: Value) -> JsonRpcResponse {
    let Some(params) = params else {
        return JsonRpcResponse::error(JsonRpcError::invalid_params("Missing params"), id);
    };
    let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::error(JsonRpcError::invalid_params("Missing tool name"), id);
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    if !tools::tool_definitions().iter().any(|d| d.name == tool_name) {
        return JsonRpcResponse::error(JsonRpcError::method_not_found(tool_name), id);
    }

    tracing::debug!(tool = %tool_name, "Calling tool");

    match tools::dispatch(&state.ctx, tool_name, arguments).await {
        Ok(result) => JsonRpcResponse::success(
            json!({
                "content": [{
                    "type": "text",
                    "text": result.to_string(),
                }],
                "isError": false,
            }),
            id,
        ),
        Err(e) => {
            tracing::warn!(tool = %tool_name, error = %e, "Tool call failed");
            JsonRpcResponse::error(JsonRpcError::from_orderflow(&e), id)
        }
    }
}

/// SSE endpoint: one "connected" event, then periodic heartbeats
pub async fn handle_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let symbols = state.ctx.settings.symbols.clone();

    let connected = stream::once(async move {
        Ok(Event::default().event("connected").data(
            json!({
                "timestamp": now_ms(),
                "symbols": symbols,
            })
            .to_string(),
        ))
    });

    let start = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
    let heartbeats = stream::unfold(
        tokio::time::interval_at(start, HEARTBEAT_INTERVAL),
        |mut interval| async move {
            interval.tick().await;
            let event = Event::default()
                .event("heartbeat")
                .data(json!({ "timestamp": now_ms() }).to_string());
            Some((Ok(event), interval))
        },
    );

    Sse::new(connected.chain(heartbeats))
}

/// Health endpoint with per-symbol orderbook sync state
pub async fn handle_healthz(State(state): State<AppState>) -> impl IntoResponse {
    let sync = state.ctx.orderbooks.sync_status().await;
    Json(json!({
        "status": "healthy",
        "timestamp": now_ms(),
        "startedAt": state.ctx.started_at,
        "symbols": state.ctx.settings.symbols,
        "orderbooks": sync,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn test_state() -> AppState {
        let mut settings = Settings::from_env().unwrap();
        settings.cache_db_path = ":memory:".to_string();
        AppState {
            ctx: AppContext::initialize(settings).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_initialize_method() {
        let state = test_state();
        let request = JsonRpcRequest::new("initialize", None, Some(json!(1)));

        let Json(response) = handle_jsonrpc(State(state), Json(request)).await;
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "orderflow-provider");
        assert_eq!(result["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn test_tools_list_method() {
        let state = test_state();
        let request = JsonRpcRequest::new("tools/list", None, Some(json!(2)));

        let Json(response) = handle_jsonrpc(State(state), Json(request)).await;
        let result = response.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 8);
        assert!(tools.iter().all(|t| t["inputSchema"].is_object()));
    }

    #[tokio::test]
    async fn test_unknown_method_is_32601() {
        let state = test_state();
        let request = JsonRpcRequest::new("resources/list", None, Some(json!(3)));

        let Json(response) = handle_jsonrpc(State(state), Json(request)).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool() {
        let state = test_state();
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "no_such_tool", "arguments": {}})),
            Some(json!(4)),
        );

        let Json(response) = handle_jsonrpc(State(state), Json(request)).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_tools_call_missing_params() {
        let state = test_state();
        let request = JsonRpcRequest::new("tools/call", None, Some(json!(5)));

        let Json(response) = handle_jsonrpc(State(state), Json(request)).await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_tools_call_depth_delta_empty_state() {
        let state = test_state();
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({
                "name": "get_orderbook_depth_delta",
                "arguments": {"symbol": "BTCUSDT"},
            })),
            Some(json!(6)),
        );

        let Json(response) = handle_jsonrpc(State(state), Json(request)).await;
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        let doc: Value = serde_json::from_str(text).unwrap();
        assert_eq!(doc["symbol"], "BTCUSDT");
        assert_eq!(doc["historyCount"], 0);
        assert!(doc["currentDepth"].is_null());
    }
}
