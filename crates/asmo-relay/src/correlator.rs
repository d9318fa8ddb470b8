use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use asmo_core::{ConnectionId, RelayError, RelayReply};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

/// How long a relayed request waits for its reply.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

type Resolution = Result<Value, RelayError>;

struct Slot {
    ticket: u64,
    /// Generation of the connection the request was forwarded to.
    generation: u64,
    tx: oneshot::Sender<Resolution>,
}

/// Tracks the single in-flight request per connection.
///
/// Per id the state is either idle (no slot) or awaiting (one slot). A slot
/// leaves the map exactly once: taken by `resolve`/`cancel`, or dropped by
/// its [`PendingReply`] on timeout. Whoever removes it delivers the only
/// resolution the waiter will see. Replies and cancellations name the
/// connection generation and only match a slot forwarded to that generation.
pub struct Correlator {
    slots: Arc<DashMap<ConnectionId, Slot>>,
    next_ticket: AtomicU64,
    deadline: Duration,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_DEADLINE)
    }
}

impl Correlator {
    pub fn new(deadline: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(1),
            deadline,
        }
    }

    /// Move `id` from idle to awaiting, on behalf of connection `generation`.
    ///
    /// Fails with `AlreadyPending` if a request for `id` is outstanding.
    pub fn send(&self, id: &ConnectionId, generation: u64) -> Result<PendingReply, RelayError> {
        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => Err(RelayError::AlreadyPending),
            Entry::Vacant(vacant) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                vacant.insert(Slot {
                    ticket,
                    generation,
                    tx,
                });
                Ok(PendingReply {
                    id: id.clone(),
                    ticket,
                    rx,
                    deadline: self.deadline,
                    slots: Arc::clone(&self.slots),
                })
            }
        }
    }

    /// Deliver a reply to the waiter for `id`.
    ///
    /// Returns false when there is no listener (never sent, already resolved,
    /// timed out, or forwarded to another generation); the reply is discarded.
    pub fn resolve(&self, id: &ConnectionId, generation: u64, reply: RelayReply) -> bool {
        let resolution = match reply {
            RelayReply::Success(data) => Ok(data),
            RelayReply::Failure(reason) => Err(RelayError::Rejected(reason)),
        };
        self.complete(id, generation, resolution)
    }

    /// Resolve the waiter forwarded to `generation` with `error` right away.
    pub fn cancel(&self, id: &ConnectionId, generation: u64, error: RelayError) -> bool {
        self.complete(id, generation, Err(error))
    }

    pub fn is_pending(&self, id: &ConnectionId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    fn complete(&self, id: &ConnectionId, generation: u64, resolution: Resolution) -> bool {
        let Some((_, slot)) = self
            .slots
            .remove_if(id, |_, slot| slot.generation == generation)
        else {
            tracing::debug!(webhook_id = %id, generation, "No matching pending request, reply discarded");
            return false;
        };
        // The waiter may have hit its deadline between our remove and this
        // send; the error just means nobody is listening anymore.
        let delivered = slot.tx.send(resolution).is_ok();
        if !delivered {
            tracing::debug!(webhook_id = %id, "Waiter gone, reply discarded");
        }
        delivered
    }
}

/// Handle to an outstanding request. Dropping it without a resolution
/// returns the connection to idle.
pub struct PendingReply {
    id: ConnectionId,
    ticket: u64,
    rx: oneshot::Receiver<Resolution>,
    deadline: Duration,
    slots: Arc<DashMap<ConnectionId, Slot>>,
}

impl PendingReply {
    /// Wait for the correlated reply, or `Timeout` once the deadline passes.
    pub async fn wait(mut self) -> Result<Value, RelayError> {
        match tokio::time::timeout(self.deadline, &mut self.rx).await {
            Ok(Ok(resolution)) => resolution,
            // Sender dropped without sending: the slot was discarded.
            Ok(Err(_)) => Err(RelayError::NotConnected),
            Err(_) => {
                tracing::warn!(
                    webhook_id = %self.id,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Relay request timed out"
                );
                Err(RelayError::Timeout(self.deadline))
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // Only clear our own slot; a newer request may already own the id.
        let ticket = self.ticket;
        let _ = self.slots.remove_if(&self.id, |_, slot| slot.ticket == ticket);
    }
}
