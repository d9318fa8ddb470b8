use asmo_core::Envelope;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("send queue full")]
    Full,
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Outbound half of a bidirectional connection.
///
/// Replies travel the other way and are fed to the relay by whoever owns the
/// inbound half, so the trait only needs `send`.
pub trait Channel: Send + Sync {
    fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError>;
}

/// Channel backed by a bounded queue drained by a socket writer task.
#[derive(Clone, Debug)]
pub struct QueueChannel {
    tx: mpsc::Sender<String>,
}

impl QueueChannel {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Channel plus the receiver a writer task should drain.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Channel for QueueChannel {
    fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        let frame = serde_json::to_string(&Envelope::new(event, payload))
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(msg_len = msg.len(), "Send queue full, dropping frame");
                Err(ChannelError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn frames_are_enveloped_json() {
        let (channel, mut rx) = QueueChannel::bounded(4);
        channel.send("webhook:request", json!({"type": "query"})).unwrap();

        let frame = rx.recv().await.unwrap();
        let env: Envelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(env.event, "webhook:request");
        assert_eq!(env.data, json!({"type": "query"}));
    }

    #[test]
    fn full_queue_is_reported() {
        let (channel, _rx) = QueueChannel::bounded(1);
        channel.send("a", Value::Null).unwrap();
        assert_eq!(channel.send("b", Value::Null), Err(ChannelError::Full));
    }

    #[test]
    fn closed_queue_is_reported() {
        let (channel, rx) = QueueChannel::bounded(1);
        drop(rx);
        assert_eq!(channel.send("a", Value::Null), Err(ChannelError::Closed));
    }
}
