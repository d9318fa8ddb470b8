pub mod errors;
pub mod ids;
pub mod wire;

pub use errors::{ErrorCode, RelayError};
pub use ids::{ConnectionId, SessionId};
pub use wire::{Envelope, RelayReply};
