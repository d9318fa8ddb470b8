use std::sync::Arc;
use std::time::Duration;

use asmo_core::wire::WEBHOOK_REQUEST;
use asmo_core::{ConnectionId, RelayError, RelayReply};
use secrecy::SecretString;
use serde_json::Value;
use tracing::instrument;

use crate::channel::Channel;
use crate::correlator::{Correlator, DEFAULT_DEADLINE};
use crate::registry::{Connection, ConnectionRegistry};

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// How long `handle` waits for the browser's reply.
    pub deadline: Duration,
    /// Refuse to relay until the connection has sent its Notion token.
    pub require_initialized: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            require_initialized: false,
        }
    }
}

/// Forwards inbound webhook bodies to the matching connection and returns
/// its correlated reply.
pub struct WebhookRelay {
    registry: ConnectionRegistry,
    correlator: Correlator,
    config: RelayConfig,
}

impl Default for WebhookRelay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

impl WebhookRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            correlator: Correlator::new(config.deadline),
            config,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Connection lifecycle: a client connected with `id`.
    ///
    /// A request still waiting on a connection this one replaces fails with
    /// `NotConnected`; its channel is gone.
    pub fn connect(&self, id: ConnectionId, channel: Arc<dyn Channel>) -> Arc<Connection> {
        let (connection, replaced) = self.registry.register(id, channel);
        if let Some(previous) = replaced {
            self.cancel_pending(&previous.id, previous.generation, "replace");
        }
        tracing::info!(
            webhook_id = %connection.id,
            generation = connection.generation,
            "Webhook connected"
        );
        connection
    }

    /// Connection lifecycle: the connection created as `generation` went away.
    ///
    /// Any request forwarded to it fails with `NotConnected` instead of
    /// sitting out the deadline. Returns false if a newer connection had
    /// already taken over the id.
    pub fn disconnect(&self, id: &ConnectionId, generation: u64) -> bool {
        self.cancel_pending(id, generation, "disconnect");
        if !self.registry.unregister_if(id, generation) {
            tracing::debug!(webhook_id = %id, generation, "Stale disconnect ignored");
            return false;
        }
        tracing::info!(webhook_id = %id, generation, "Webhook disconnected");
        true
    }

    fn cancel_pending(&self, id: &ConnectionId, generation: u64, cause: &'static str) {
        if self.correlator.cancel(id, generation, RelayError::NotConnected) {
            tracing::info!(webhook_id = %id, generation, cause, "Pending request cancelled");
        }
    }

    /// Store the downstream Notion token sent by the connection.
    pub fn set_token(&self, id: &ConnectionId, token: SecretString) -> bool {
        match self.registry.lookup(id) {
            Some(connection) => {
                connection.set_notion_token(token);
                connection.touch();
                tracing::info!(webhook_id = %id, "Notion token set");
                true
            }
            None => false,
        }
    }

    /// Feed a `webhook:response` received from connection `generation`.
    ///
    /// Only resolves a request that was forwarded to that same generation.
    pub fn deliver_reply(&self, id: &ConnectionId, generation: u64, reply: RelayReply) -> bool {
        if let Some(connection) = self.registry.lookup(id) {
            if connection.generation == generation {
                connection.touch();
            }
        }
        self.correlator.resolve(id, generation, reply)
    }

    /// Relay `body` to connection `id` and wait for its reply.
    #[instrument(skip(self, id, body), fields(webhook_id = %id))]
    pub async fn handle(&self, id: &ConnectionId, body: Value) -> Result<Value, RelayError> {
        let connection = self.registry.lookup(id).ok_or(RelayError::NotConnected)?;

        if self.config.require_initialized && !connection.has_notion_token() {
            return Err(RelayError::NotInitialized);
        }

        // Reserve the slot before forwarding so a rejected overlap never
        // reaches the channel.
        let pending = self.correlator.send(id, connection.generation)?;

        if let Err(e) = connection.channel.send(WEBHOOK_REQUEST, body) {
            tracing::warn!(error = %e, "Failed to forward webhook request");
            // Dropping `pending` frees the slot.
            return Err(RelayError::NotConnected);
        }
        connection.touch();
        tracing::debug!("Webhook request forwarded");

        let result = pending.wait().await;
        match &result {
            Ok(_) => tracing::debug!("Webhook request resolved"),
            Err(e) => tracing::info!(code = %e.code(), error = %e, "Webhook request failed"),
        }
        result
    }

    /// Push a server-side event to connection `id`.
    pub fn notify(&self, id: &ConnectionId, event: &str, data: Value) -> bool {
        let Some(connection) = self.registry.lookup(id) else {
            return false;
        };
        match connection.channel.send(event, data) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(webhook_id = %id, event, error = %e, "Failed to notify webhook");
                false
            }
        }
    }

    /// Drop connections idle for at least `max_idle`. Returns how many.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        self.registry
            .idle(max_idle)
            .into_iter()
            .filter(|conn| self.disconnect(&conn.id, conn.generation))
            .count()
    }
}
