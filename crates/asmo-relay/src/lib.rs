//! Pairs inbound webhook calls with live browser connections.
//!
//! A [`WebhookRelay`] owns a [`ConnectionRegistry`] (who is connected) and a
//! [`Correlator`] (the single in-flight request per connection). Callers only
//! go through the relay; neither map is shared process-wide.

pub mod channel;
pub mod correlator;
pub mod registry;
pub mod relay;

pub use channel::{Channel, ChannelError, QueueChannel};
pub use correlator::{Correlator, PendingReply, DEFAULT_DEADLINE};
pub use registry::{Connection, ConnectionRegistry};
pub use relay::{RelayConfig, WebhookRelay};
