//! MCP tool registry and dispatch
//!
//! Each tool composes a point-in-time JSON document from the engine
//! snapshots. Definitions carry a JSON schema for the arguments; dispatch
//! deserializes the incoming arguments and routes by name.

pub mod depth_delta;
pub mod footprint;
pub mod funding_rate;
pub mod key_levels;
pub mod liquidations;
pub mod market_snapshot;
pub mod open_interest;
pub mod orderflow_metrics;

use crate::error::{OrderflowError, Result};
use crate::supervisor::AppContext;
use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// One entry of the `tools/list` response
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// All available tools with their argument schemas
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_market_snapshot",
            description: "Current market snapshot: last price, mark/index price, 24h statistics, funding, open interest and CVD",
            input_schema: schema_of::<market_snapshot::MarketSnapshotArgs>(),
        },
        ToolDefinition {
            name: "get_key_levels",
            description: "Key trading levels: developing and previous-day VWAP, Volume Profile POC/VAH/VAL, and session highs/lows",
            input_schema: schema_of::<key_levels::KeyLevelsArgs>(),
        },
        ToolDefinition {
            name: "get_footprint",
            description: "Footprint bars with per-price-level buy/sell volume, delta and POC",
            input_schema: schema_of::<footprint::FootprintArgs>(),
        },
        ToolDefinition {
            name: "get_orderflow_metrics",
            description: "Orderflow metrics: delta sequence, CVD, divergence probe and stacked-imbalance analysis",
            input_schema: schema_of::<orderflow_metrics::OrderflowMetricsArgs>(),
        },
        ToolDefinition {
            name: "get_orderbook_depth_delta",
            description: "Orderbook depth within a percent band over time: current sample, history and summary",
            input_schema: schema_of::<depth_delta::DepthDeltaArgs>(),
        },
        ToolDefinition {
            name: "stream_liquidations",
            description: "Recent forced liquidations with aggregate statistics",
            input_schema: schema_of::<liquidations::LiquidationsArgs>(),
        },
        ToolDefinition {
            name: "get_open_interest",
            description: "Current open interest plus history and period delta",
            input_schema: schema_of::<open_interest::OpenInterestArgs>(),
        },
        ToolDefinition {
            name: "get_funding_rate",
            description: "Current funding rate, next funding time and funding history",
            input_schema: schema_of::<funding_rate::FundingRateArgs>(),
        },
    ]
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| OrderflowError::InvalidRequest(format!("Invalid tool arguments: {}", e)))
}

/// Route a `tools/call` to its handler
pub async fn dispatch(ctx: &AppContext, name: &str, arguments: Value) -> Result<Value> {
    match name {
        "get_market_snapshot" => market_snapshot::run(ctx, parse_args(arguments)?).await,
        "get_key_levels" => key_levels::run(ctx, parse_args(arguments)?).await,
        "get_footprint" => footprint::run(ctx, parse_args(arguments)?).await,
        "get_orderflow_metrics" => orderflow_metrics::run(ctx, parse_args(arguments)?).await,
        "get_orderbook_depth_delta" => depth_delta::run(ctx, parse_args(arguments)?).await,
        "stream_liquidations" => liquidations::run(ctx, parse_args(arguments)?).await,
        "get_open_interest" => open_interest::run(ctx, parse_args(arguments)?).await,
        "get_funding_rate" => funding_rate::run(ctx, parse_args(arguments)?).await,
        other => Err(OrderflowError::InvalidRequest(format!(
            "Unknown tool: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_cover_all_tools() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 8);
        let names: Vec<_> = defs.iter().map(|d| d.name).collect();
        assert!(names.contains(&"get_market_snapshot"));
        assert!(names.contains(&"get_footprint"));
        assert!(names.contains(&"stream_liquidations"));
        // Every schema is an object schema
        for def in &defs {
            assert!(def.input_schema.is_object(), "{} schema", def.name);
        }
    }
}
