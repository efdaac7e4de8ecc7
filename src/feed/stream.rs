//! Event-scoped update subscription over WebSocket.
//!
//! The provider pushes tokened update messages for a single event; the
//! client must send a periodic keepalive to hold the subscription open.
//! Tokens are opaque and monotonically increasing; deduplication happens in
//! the session layer, this module only delivers.
//!
//! Reconnects are bounded: up to [`MAX_CONNECT_ATTEMPTS`] consecutive
//! failures with doubled, jittered backoff, the counter resetting once a
//! connection actually delivers an update. After the budget is spent the
//! channel closes and the session falls back to its liveness polling.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use crate::models::StreamUpdate;
use crate::pacing::RequestGate;

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const MAX_BACKOFF_SECS: u64 = 30;
const KEEPALIVE_INTERVAL_SECS: u64 = 25;

/// Open the update stream for one event. The returned receiver yields
/// tokened updates; dropping it tears the connection down.
pub(crate) fn open_update_stream(
    ws_url: String,
    event_id: String,
    gate: Arc<RequestGate>,
) -> mpsc::Receiver<StreamUpdate> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        stream_loop(&ws_url, &event_id, gate, tx).await;
    });
    rx
}

async fn stream_loop(
    ws_url: &str,
    event_id: &str,
    gate: Arc<RequestGate>,
    tx: mpsc::Sender<StreamUpdate>,
) {
    let mut failures = 0u32;
    let mut backoff_secs = 1u64;

    loop {
        if tx.is_closed() {
            return;
        }

        // Stream connects hit the same provider as everything else.
        gate.admit().await;
        let url = format!("{}/events/{}", ws_url, event_id);

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                info!("[{}] update stream connected", event_id);
                match run_connection(ws, event_id, &tx, &mut failures, &mut backoff_secs).await {
                    ConnectionEnd::ReceiverDropped => return,
                    ConnectionEnd::Disconnected => failures += 1,
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "[{}] update stream connect failed ({}/{}): {}",
                    event_id, failures, MAX_CONNECT_ATTEMPTS, e
                );
            }
        }

        if failures >= MAX_CONNECT_ATTEMPTS {
            break;
        }

        let jitter_ms: u64 = rand::thread_rng().gen_range(0..=250);
        tokio::time::sleep(Duration::from_millis(backoff_secs * 1000 + jitter_ms)).await;
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }

    error!(
        "[{}] update stream abandoned after {} consecutive failures",
        event_id, MAX_CONNECT_ATTEMPTS
    );
    // Dropping tx closes the receiver; the session keeps running on its
    // liveness timer alone.
}

enum ConnectionEnd {
    ReceiverDropped,
    Disconnected,
}

async fn run_connection(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    event_id: &str,
    tx: &mpsc::Sender<StreamUpdate>,
    failures: &mut u32,
    backoff_secs: &mut u64,
) -> ConnectionEnd {
    let (mut write, mut read) = ws.split();

    let subscribe = serde_json::json!({"type": "subscribe", "event": event_id}).to_string();
    if write.send(Message::Text(subscribe)).await.is_err() {
        return ConnectionEnd::Disconnected;
    }

    let mut keepalive =
        tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // Some providers probe with a bare text ping.
                        if text.trim() == "ping" {
                            let _ = write.send(Message::Text("pong".to_string())).await;
                            continue;
                        }
                        if let Some(update) = parse_stream_update(&text) {
                            if tx.send(update).await.is_err() {
                                return ConnectionEnd::ReceiverDropped;
                            }
                            *failures = 0;
                            *backoff_secs = 1;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("[{}] server closed update stream", event_id);
                        return ConnectionEnd::Disconnected;
                    }
                    Some(Err(e)) => {
                        error!("[{}] update stream error: {}", event_id, e);
                        return ConnectionEnd::Disconnected;
                    }
                    None => {
                        warn!("[{}] update stream ended", event_id);
                        return ConnectionEnd::Disconnected;
                    }
                    _ => {}
                }
            }
            _ = keepalive.tick() => {
                let ka = serde_json::json!({"type": "keepalive"}).to_string();
                if write.send(Message::Text(ka)).await.is_err() {
                    return ConnectionEnd::Disconnected;
                }
            }
        }
    }
}

/// Parse a raw stream frame into an update. Keepalive echoes and unknown
/// frames yield `None`.
fn parse_stream_update(text: &str) -> Option<StreamUpdate> {
    let val: serde_json::Value = serde_json::from_str(text).ok()?;
    if val["type"].as_str() == Some("keepalive") {
        return None;
    }
    let token = &val["token"];
    let token = token
        .as_str()
        .map(str::to_string)
        .or_else(|| token.as_u64().map(|n| n.to_string()))?;
    Some(StreamUpdate { token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update_with_string_token() {
        let update = parse_stream_update(r#"{"type":"update","event":"401","token":"172"}"#);
        assert_eq!(update, Some(StreamUpdate { token: "172".into() }));
    }

    #[test]
    fn test_parse_update_with_numeric_token() {
        let update = parse_stream_update(r#"{"token": 9001}"#);
        assert_eq!(update, Some(StreamUpdate { token: "9001".into() }));
    }

    #[test]
    fn test_keepalive_echo_ignored() {
        assert!(parse_stream_update(r#"{"type":"keepalive"}"#).is_none());
    }

    #[test]
    fn test_garbage_ignored() {
        assert!(parse_stream_update("not json").is_none());
        assert!(parse_stream_update(r#"{"event":"401"}"#).is_none());
    }
}
