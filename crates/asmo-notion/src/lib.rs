//! Minimal Notion API client and the memory operations built on it.

pub mod client;
pub mod error;
pub mod memory;
pub mod verify;

pub use client::{DatabaseSummary, NotionClient, NOTION_API_URL, NOTION_VERSION};
pub use error::NotionError;
pub use memory::{GroupAssignment, MemoryDatabases, MemoryQuery, MemoryService, NewMemory};
pub use verify::{NotionVerifier, TokenVerifier};
