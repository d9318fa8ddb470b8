//! HTTP and WebSocket front door for the webhook relay.

pub mod config;
pub mod error;
pub mod handlers;
pub mod ratelimit;
pub mod server;
pub mod socket;

pub use config::{ConfigError, ServerConfig};
pub use server::{build_router, start, AppState, ServerError, ServerHandle};
