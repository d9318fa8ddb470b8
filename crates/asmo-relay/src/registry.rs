use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use asmo_core::ConnectionId;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use secrecy::SecretString;
use tokio::time::Instant;

use crate::channel::Channel;

/// A live connection as tracked by the registry.
pub struct Connection {
    pub id: ConnectionId,
    pub channel: Arc<dyn Channel>,
    /// Distinguishes successive connections that reuse the same id.
    pub generation: u64,
    last_activity: Mutex<Instant>,
    notion_token: RwLock<Option<SecretString>>,
}

impl Connection {
    fn new(id: ConnectionId, channel: Arc<dyn Channel>, generation: u64) -> Self {
        Self {
            id,
            channel,
            generation,
            last_activity: Mutex::new(Instant::now()),
            notion_token: RwLock::new(None),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_idle(&self, max_idle: Duration) -> bool {
        self.idle_for() >= max_idle
    }

    pub fn set_notion_token(&self, token: SecretString) {
        *self.notion_token.write() = Some(token);
    }

    pub fn has_notion_token(&self) -> bool {
        self.notion_token.read().is_some()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("idle_for", &self.idle_for())
            .field("has_notion_token", &self.has_notion_token())
            .finish_non_exhaustive()
    }
}

/// Live connections keyed by the client-chosen identifier.
///
/// At most one entry per id; a later `register` replaces the earlier one.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_generation: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Store `channel` under `id`, replacing any prior entry.
    ///
    /// Returns the new entry and the one it replaced, if any. The replaced
    /// channel is dropped, not closed; its owner's disconnect path cleans up
    /// after itself.
    pub fn register(
        &self,
        id: ConnectionId,
        channel: Arc<dyn Channel>,
    ) -> (Arc<Connection>, Option<Arc<Connection>>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(id.clone(), channel, generation));
        let previous = self.connections.insert(id.clone(), Arc::clone(&connection));
        if let Some(previous) = &previous {
            tracing::info!(
                webhook_id = %id,
                replaced_generation = previous.generation,
                generation,
                "Connection replaced"
            );
        }
        (connection, previous)
    }

    /// Remove the entry for `id` if present. Unknown ids are a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Remove the entry for `id` only if it is still the one created with
    /// `generation`.
    pub fn unregister_if(&self, id: &ConnectionId, generation: u64) -> bool {
        self.connections
            .remove_if(id, |_, conn| conn.generation == generation)
            .is_some()
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Connections with no activity for at least `max_idle`.
    pub fn idle(&self, max_idle: Duration) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_idle(max_idle))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
