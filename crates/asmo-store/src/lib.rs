pub mod auth;
pub mod database;
pub mod error;
pub mod schema;

pub use auth::{AuthRepo, SessionRow, DEFAULT_USER_ID};
pub use database::Database;
pub use error::StoreError;
