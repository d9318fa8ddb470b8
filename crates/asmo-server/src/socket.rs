//! Browser WebSocket connections: one per webhook id.

use std::sync::Arc;
use std::time::Duration;

use asmo_core::wire::{CONNECTION_READY, NOTION_SET_TOKEN, WEBHOOK_RESPONSE};
use asmo_core::{ConnectionId, Envelope, RelayReply};
use asmo_relay::{QueueChannel, WebhookRelay};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "webhookId", default)]
    pub webhook_id: Option<String>,
}

/// `GET /ws?webhookId=<id>`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(id) = params.webhook_id.filter(|id| !id.trim().is_empty()) else {
        return ApiError::bad_request("webhookId is required").into_response();
    };
    let id = ConnectionId::from_raw(id);
    ws.on_upgrade(move |socket| handle_socket(socket, id, state))
}

/// Run one connection until either side goes away.
///
/// The registry holds the only strong reference to the outbound queue, so
/// replacing or reaping the connection ends the writer and closes the socket.
async fn handle_socket(socket: WebSocket, id: ConnectionId, state: AppState) {
    let (channel, mut rx) = QueueChannel::bounded(state.config.max_send_queue);
    let generation = state.relay.connect(id.clone(), Arc::new(channel)).generation;
    state
        .relay
        .notify(&id, CONNECTION_READY, json!({ "webhookId": id.as_str() }));

    let (mut ws_tx, mut ws_rx) = socket.split();
    let heartbeat = Duration::from_secs(state.config.heartbeat_interval_secs);

    let writer_id = id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(webhook_id = %writer_id, "Sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_id = id.clone();
    let relay = Arc::clone(&state.relay);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => dispatch_frame(&relay, &reader_id, generation, text.as_str()),
                WsMessage::Pong(_) | WsMessage::Ping(_) => touch(&relay, &reader_id, generation),
                WsMessage::Close(_) => break,
                WsMessage::Binary(_) => {
                    tracing::debug!(webhook_id = %reader_id, "Ignoring binary frame");
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.relay.disconnect(&id, generation);
}

fn touch(relay: &WebhookRelay, id: &ConnectionId, generation: u64) {
    if let Some(connection) = relay.registry().lookup(id) {
        if connection.generation == generation {
            connection.touch();
        }
    }
}

/// Token payload: either a bare string or `{"token": "..."}`.
fn token_from(data: &Value) -> Option<&str> {
    data.as_str()
        .or_else(|| data.get("token").and_then(Value::as_str))
        .filter(|token| !token.is_empty())
}

/// Handle one inbound text frame from connection `id`/`generation`.
pub(crate) fn dispatch_frame(relay: &WebhookRelay, id: &ConnectionId, generation: u64, text: &str) {
    let current = relay
        .registry()
        .lookup(id)
        .is_some_and(|connection| connection.generation == generation);
    if !current {
        tracing::debug!(webhook_id = %id, generation, "Frame from replaced connection ignored");
        return;
    }
    touch(relay, id, generation);

    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(webhook_id = %id, error = %e, "Malformed frame");
            return;
        }
    };

    match envelope.event.as_str() {
        WEBHOOK_RESPONSE => match serde_json::from_value::<RelayReply>(envelope.data) {
            Ok(reply) => {
                if !relay.deliver_reply(id, generation, reply) {
                    tracing::debug!(webhook_id = %id, "Reply without pending request discarded");
                }
            }
            Err(e) => tracing::debug!(webhook_id = %id, error = %e, "Malformed webhook response"),
        },
        NOTION_SET_TOKEN => match token_from(&envelope.data) {
            Some(token) => {
                relay.set_token(id, SecretString::from(token));
            }
            None => tracing::debug!(webhook_id = %id, "Empty Notion token ignored"),
        },
        other => tracing::debug!(webhook_id = %id, event = other, "Unknown event ignored"),
    }
}

/// Periodically drop silent connections, expired sessions and idle
/// rate-limit buckets.
pub fn start_cleanup_task(state: AppState, interval: Duration) -> JoinHandle<()> {
    let client_timeout = Duration::from_secs(state.config.client_timeout_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;

            let reaped = state.relay.reap_idle(client_timeout);
            if reaped > 0 {
                tracing::info!(count = reaped, "Reaped idle connections");
            }
            match state.auth.delete_expired() {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "Expired sessions removed"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
            let pruned = state.limiter.prune();
            tracing::trace!(pruned, "Rate limiter pruned");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmo_core::RelayError;
    use asmo_relay::{Channel, ChannelError, RelayConfig};
    use parking_lot::Mutex;

    use crate::config::ServerConfig;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl Channel for RecordingChannel {
        fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
            self.sent.lock().push((event.to_string(), payload));
            Ok(())
        }
    }

    fn relay() -> Arc<WebhookRelay> {
        Arc::new(WebhookRelay::new(RelayConfig {
            deadline: Duration::from_secs(5),
            require_initialized: false,
        }))
    }

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from_raw(s)
    }

    #[tokio::test]
    async fn response_frame_resolves_pending_request() {
        let relay = relay();
        let generation = relay
            .connect(id("abc123"), Arc::new(RecordingChannel::default()))
            .generation;

        let task_relay = Arc::clone(&relay);
        let call = tokio::spawn(async move {
            task_relay.handle(&id("abc123"), json!({ "query": "x" })).await
        });
        while !relay.correlator().is_pending(&id("abc123")) {
            tokio::task::yield_now().await;
        }

        dispatch_frame(
            &relay,
            &id("abc123"),
            generation,
            r#"{"event":"webhook:response","data":{"success":true,"data":{"n":1}}}"#,
        );
        assert_eq!(call.await.unwrap(), Ok(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn failure_frame_rejects() {
        let relay = relay();
        let generation = relay
            .connect(id("a"), Arc::new(RecordingChannel::default()))
            .generation;
        let task_relay = Arc::clone(&relay);
        let call = tokio::spawn(async move { task_relay.handle(&id("a"), json!({})).await });
        while !relay.correlator().is_pending(&id("a")) {
            tokio::task::yield_now().await;
        }

        dispatch_frame(
            &relay,
            &id("a"),
            generation,
            r#"{"event":"webhook:response","data":{"success":false,"error":"boom"}}"#,
        );
        assert_eq!(call.await.unwrap(), Err(RelayError::Rejected("boom".into())));
    }

    #[test]
    fn set_token_frame_stores_token() {
        let relay = relay();
        let conn = relay.connect(id("a"), Arc::new(RecordingChannel::default()));
        dispatch_frame(&relay, &id("a"), conn.generation, r#"{"event":"notion:setToken","data":"secret_1"}"#);
        assert!(conn.has_notion_token());
    }

    #[test]
    fn token_payload_shapes() {
        assert_eq!(token_from(&json!("t")), Some("t"));
        assert_eq!(token_from(&json!({ "token": "t" })), Some("t"));
        assert_eq!(token_from(&json!("")), None);
        assert_eq!(token_from(&json!(42)), None);
    }

    #[test]
    fn frames_from_replaced_connection_are_ignored() {
        let relay = relay();
        let old = relay.connect(id("a"), Arc::new(RecordingChannel::default()));
        let new = relay.connect(id("a"), Arc::new(RecordingChannel::default()));
        dispatch_frame(&relay, &id("a"), old.generation, r#"{"event":"notion:setToken","data":"t"}"#);
        assert!(!new.has_notion_token());
    }

    #[test]
    fn malformed_and_unknown_frames_are_ignored() {
        let relay = relay();
        let conn = relay.connect(id("a"), Arc::new(RecordingChannel::default()));
        dispatch_frame(&relay, &id("a"), conn.generation, "not json");
        dispatch_frame(&relay, &id("a"), conn.generation, r#"{"event":"chat:message","data":{}}"#);
        dispatch_frame(&relay, &id("a"), conn.generation, r#"{"event":"webhook:response","data":7}"#);
        assert_eq!(relay.registry().count(), 1);
        assert_eq!(relay.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn response_frame_from_replaced_connection_does_not_resolve() {
        let relay = relay();
        let old = relay.connect(id("a"), Arc::new(RecordingChannel::default()));
        let new = relay.connect(id("a"), Arc::new(RecordingChannel::default()));
        let task_relay = Arc::clone(&relay);
        let call = tokio::spawn(async move { task_relay.handle(&id("a"), json!({})).await });
        while !relay.correlator().is_pending(&id("a")) {
            tokio::task::yield_now().await;
        }

        let reply = r#"{"event":"webhook:response","data":{"success":true,"data":"stale"}}"#;
        dispatch_frame(&relay, &id("a"), old.generation, reply);
        assert!(relay.correlator().is_pending(&id("a")));

        dispatch_frame(
            &relay,
            &id("a"),
            new.generation,
            r#"{"event":"webhook:response","data":{"success":true,"data":"fresh"}}"#,
        );
        assert_eq!(call.await.unwrap(), Ok(json!("fresh")));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_reaps_silent_connection_and_cancels_its_request() {
        let state = AppState::new(ServerConfig {
            require_notion_token: false,
            relay_timeout_secs: 300,
            client_timeout_secs: 90,
            ..ServerConfig::default()
        })
        .unwrap();
        let _ = state
            .relay
            .connect(id("abc"), Arc::new(RecordingChannel::default()));

        let started = tokio::time::Instant::now();
        let task_relay = Arc::clone(&state.relay);
        let call = tokio::spawn(async move { task_relay.handle(&id("abc"), json!({})).await });
        while !state.relay.correlator().is_pending(&id("abc")) {
            tokio::task::yield_now().await;
        }

        let cleanup = start_cleanup_task(state.clone(), Duration::from_secs(20));
        assert_eq!(call.await.unwrap(), Err(RelayError::NotConnected));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(90), "reaped after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(300), "reaped after {elapsed:?}");
        assert!(state.relay.registry().lookup(&id("abc")).is_none());
        cleanup.abort();
    }
}
