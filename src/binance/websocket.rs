//! Binance futures WebSocket client
//!
//! Connects to the combined stream endpoint
//! (`wss://fstream.binance.com/stream?streams=<s1>/<s2>/...`) and decodes
//! each `{stream, data}` envelope into a typed [`MarketEvent`]. The
//! connection cycles `Disconnected -> Connecting -> Connected` with a
//! reconnect delay of `base * min(attempts, 5)` and a capped attempt count;
//! attempts reset to zero after a successful connection.

use crate::binance::types::{
    AggTradeEvent, DepthUpdateEvent, ForceOrderEvent, MarkPriceEvent, StreamEnvelope,
};
use crate::error::{OrderflowError, Result};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// A decoded event from any subscribed subtopic
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Trade(AggTradeEvent),
    Depth(DepthUpdateEvent),
    MarkPrice(MarkPriceEvent),
    ForceOrder(ForceOrderEvent),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Trade(e) => &e.symbol,
            MarketEvent::Depth(e) => &e.symbol,
            MarketEvent::MarkPrice(e) => &e.symbol,
            MarketEvent::ForceOrder(e) => &e.order.symbol,
        }
    }
}

/// Connection lifecycle states, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Combined-stream WebSocket reader
///
/// One instance covers every subscribed symbol; the supervisor builds the
/// subtopic list (`@aggTrade`, `@depth@100ms`, `@markPrice@1s`,
/// `@forceOrder` per symbol) and spawns [`MarketStream::run`] as a task.
pub struct MarketStream {
    base_url: String,
    streams: Vec<String>,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
}

impl MarketStream {
    pub fn new(
        base_url: impl Into<String>,
        streams: Vec<String>,
        reconnect_delay: Duration,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            streams,
            reconnect_delay,
            max_reconnect_attempts,
        }
    }

    /// Build the subtopic list for a set of symbols
    pub fn subtopics_for(symbols: &[String]) -> Vec<String> {
        let mut streams = Vec::with_capacity(symbols.len() * 4);
        for symbol in symbols {
            let s = symbol.to_lowercase();
            streams.push(format!("{}@aggTrade", s));
            streams.push(format!("{}@depth@100ms", s));
            streams.push(format!("{}@markPrice@1s", s));
            streams.push(format!("{}@forceOrder", s));
        }
        streams
    }

    fn url(&self) -> String {
        format!("{}/stream?streams={}", self.base_url, self.streams.join("/"))
    }

    /// Read the combined stream until shutdown, reconnecting on failure
    ///
    /// Decoded events go to `tx` in arrival order. Returns an error only
    /// when the reconnect budget is exhausted.
    pub async fn run(
        &self,
        tx: mpsc::UnboundedSender<MarketEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let url = self.url();
        let mut attempts = 0u32;
        let mut state: ConnectionState;
        // Parse failures are logged once per failing event type, then skipped
        let mut logged_parse_kinds: HashSet<String> = HashSet::new();

        loop {
            state = ConnectionState::Connecting;
            tracing::info!(streams = self.streams.len(), state = ?state, "Connecting to combined stream");

            let connect = tokio::select! {
                res = connect_async(&url) => res,
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown during connect, stopping market stream");
                    return Ok(());
                }
            };

            match connect {
                Ok((ws_stream, _)) => {
                    state = ConnectionState::Connected;
                    attempts = 0;
                    tracing::info!(state = ?state, "Combined stream connected");

                    let (_write, mut read) = ws_stream.split();

                    loop {
                        let msg = tokio::select! {
                            msg = read.next() => msg,
                            _ = shutdown.recv() => {
                                tracing::info!("Shutdown signal received, closing market stream");
                                return Ok(());
                            }
                        };

                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) =
                                    decode_envelope(&text, &mut logged_parse_kinds)
                                {
                                    if tx.send(event).is_err() {
                                        tracing::warn!("Event receiver dropped, stopping stream");
                                        return Ok(());
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!(frame = ?frame, "WebSocket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!(error = %e, "WebSocket read error");
                                break;
                            }
                            None => {
                                tracing::warn!("WebSocket stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to connect to combined stream");
                }
            }

            state = ConnectionState::Disconnected;
            attempts += 1;

            if attempts > self.max_reconnect_attempts {
                return Err(OrderflowError::Connection(format!(
                    "Max reconnect attempts ({}) exceeded",
                    self.max_reconnect_attempts
                )));
            }

            let delay = self.reconnect_delay * attempts.min(5);
            tracing::info!(attempts, delay_secs = delay.as_secs(), state = ?state, "Reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown during reconnect back-off");
                    return Ok(());
                }
            }
        }
    }
}

/// Decode one combined-stream envelope into a typed event
///
/// Unexpected shapes are logged once per event kind and skipped; they never
/// take the stream down.
fn decode_envelope(text: &str, logged_kinds: &mut HashSet<String>) -> Option<MarketEvent> {
    let envelope: StreamEnvelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            if logged_kinds.insert("envelope".to_string()) {
                tracing::warn!(error = %e, "Failed to parse stream envelope (logged once)");
            }
            return None;
        }
    };

    let event_type = envelope
        .data
        .get("e")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let parsed = match event_type.as_str() {
        "aggTrade" => serde_json::from_value::<AggTradeEvent>(envelope.data)
            .map(MarketEvent::Trade)
            .map_err(|e| e.to_string()),
        "depthUpdate" => serde_json::from_value::<DepthUpdateEvent>(envelope.data)
            .map(MarketEvent::Depth)
            .map_err(|e| e.to_string()),
        "markPriceUpdate" => serde_json::from_value::<MarkPriceEvent>(envelope.data)
            .map(MarketEvent::MarkPrice)
            .map_err(|e| e.to_string()),
        "forceOrder" => serde_json::from_value::<ForceOrderEvent>(envelope.data)
            .map(MarketEvent::ForceOrder)
            .map_err(|e| e.to_string()),
        other => {
            if logged_kinds.insert(format!("unknown:{}", other)) {
                tracing::debug!(event_type = other, "Ignoring unknown event type");
            }
            return None;
        }
    };

    match parsed {
        Ok(event) => Some(event),
        Err(e) => {
            if logged_kinds.insert(event_type.clone()) {
                tracing::warn!(event_type, error = %e, "Failed to parse event (logged once per kind)");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtopics_for_symbols() {
        let streams = MarketStream::subtopics_for(&["BTCUSDT".to_string()]);
        assert_eq!(
            streams,
            vec![
                "btcusdt@aggTrade",
                "btcusdt@depth@100ms",
                "btcusdt@markPrice@1s",
                "btcusdt@forceOrder",
            ]
        );
    }

    #[test]
    fn test_combined_url() {
        let stream = MarketStream::new(
            "wss://fstream.binance.com",
            vec!["btcusdt@aggTrade".into(), "btcusdt@depth@100ms".into()],
            Duration::from_secs(5),
            10,
        );
        assert_eq!(
            stream.url(),
            "wss://fstream.binance.com/stream?streams=btcusdt@aggTrade/btcusdt@depth@100ms"
        );
    }

    #[test]
    fn test_decode_trade_envelope() {
        let mut kinds = HashSet::new();
        let text = r#"{
            "stream": "btcusdt@aggTrade",
            "data": {
                "e": "aggTrade", "E": 1672531200100, "s": "BTCUSDT",
                "a": 1, "p": "50000", "q": "1.5", "f": 1, "l": 1,
                "T": 1672531200000, "m": false
            }
        }"#;

        match decode_envelope(text, &mut kinds) {
            Some(MarketEvent::Trade(trade)) => {
                assert_eq!(trade.symbol, "BTCUSDT");
                assert_eq!(trade.quantity, "1.5");
            }
            other => panic!("Expected trade event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_bad_envelope_logged_once() {
        let mut kinds = HashSet::new();
        assert!(decode_envelope("not json", &mut kinds).is_none());
        assert!(decode_envelope("still not json", &mut kinds).is_none());
        assert_eq!(kinds.len(), 1);
    }

    #[test]
    fn test_decode_unknown_event_skipped() {
        let mut kinds = HashSet::new();
        let text = r#"{"stream": "x", "data": {"e": "kline"}}"#;
        assert!(decode_envelope(text, &mut kinds).is_none());
    }
}
