//! Frames exchanged with browser clients over the WebSocket channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server → client: a relayed webhook body awaiting a `webhook:response`.
pub const WEBHOOK_REQUEST: &str = "webhook:request";
/// Client → server: the reply to the outstanding `webhook:request`.
pub const WEBHOOK_RESPONSE: &str = "webhook:response";
/// Server → client: liveness nudge carrying a timestamp.
pub const WEBHOOK_PING: &str = "webhook:ping";
/// Client → server: Notion integration token for this connection.
pub const NOTION_SET_TOKEN: &str = "notion:setToken";
/// Server → client: sent once after the connection is registered.
pub const CONNECTION_READY: &str = "connection:ready";

/// One JSON text frame: `{ "event": ..., "data": ... }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Decoded `webhook:response` payload.
///
/// The wire shape is `{success: true, data}` or `{success: false, error}`;
/// it is decoded exactly once here so nothing downstream branches on raw JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawReply", into = "RawReply")]
pub enum RelayReply {
    Success(Value),
    Failure(String),
}

#[derive(Serialize, Deserialize)]
struct RawReply {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<RawReply> for RelayReply {
    fn from(raw: RawReply) -> Self {
        if raw.success {
            Self::Success(raw.data.unwrap_or(Value::Null))
        } else {
            Self::Failure(raw.error.unwrap_or_else(|| "Unknown error".to_string()))
        }
    }
}

impl From<RelayReply> for RawReply {
    fn from(reply: RelayReply) -> Self {
        match reply {
            RelayReply::Success(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            RelayReply::Failure(error) => Self {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}
