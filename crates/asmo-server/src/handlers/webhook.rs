//! Webhook relay routes and health.

use asmo_core::wire::WEBHOOK_PING;
use asmo_core::ConnectionId;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Parse an inbound webhook body. Empty bodies relay as `{}`, non-JSON
/// bodies as a JSON string.
pub(crate) fn webhook_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return json!({});
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// `POST /webhook/{id}` and aliases: relay the body and return the reply.
pub async fn relay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let id = ConnectionId::from_raw(id);
    let data = state.relay.handle(&id, webhook_body(&body)).await?;
    Ok(Json(data))
}

/// `POST /api/webhook/{id}/ping`: push a ping to the connected browser.
pub async fn ping(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = ConnectionId::from_raw(id);
    let timestamp = chrono::Utc::now().to_rfc3339();
    if !state.relay.notify(&id, WEBHOOK_PING, json!({ "timestamp": timestamp })) {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Webhook not found"));
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.relay.registry().count(),
        "pending": state.relay.correlator().pending_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_relays_as_object() {
        assert_eq!(webhook_body(b""), json!({}));
        assert_eq!(webhook_body(b"  \n"), json!({}));
    }

    #[test]
    fn json_body_is_parsed() {
        assert_eq!(webhook_body(br#"{"query":"x"}"#), json!({"query": "x"}));
        assert_eq!(webhook_body(b"[1,2]"), json!([1, 2]));
    }

    #[test]
    fn text_body_relays_as_string() {
        assert_eq!(webhook_body(b"hello"), json!("hello"));
    }
}
