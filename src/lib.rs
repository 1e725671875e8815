//! Embedded MCP server exposing Beeper chats, contacts and messages to AI
//! assistant clients over HTTP + server-sent events.

pub mod config;
pub mod error;
pub mod format;
pub mod protocol;
pub mod records;
pub mod resources;
pub mod server;
pub mod session;
pub mod sse;
pub mod store;
pub mod supervisor;
pub mod tools;

pub use config::{ConfigOverrides, ServerConfig, resolve_config};
pub use error::{ServerError, StoreError, SupervisorError};
pub use protocol::McpHandler;
pub use store::{MemoryStore, RecordStore};
pub use supervisor::{HeadlessPlatform, HostPlatform, LifecycleState, Supervisor};
pub use tools::ToolRegistry;
