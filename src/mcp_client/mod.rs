//! MCP client: JSON-RPC client for automation servers.
//!
//! This module handles:
//! - Byte transports over child-process stdio and websockets
//! - Framing the raw stream into JSON-RPC documents
//! - Request/response correlation with per-call timeouts
//! - The per-connection handshake, tool discovery, and teardown
//! - The registry of named connections and their persisted configs
//!
//! The host constructs one [`ConnectionRegistry`] and shares it by handle.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod rpc;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use catalog::{ToolCatalog, ToolResolution};
pub use config::{ConfigStore, ConnectionConfig, ProcessCommand, TransportConfig};
pub use errors::McpError;
pub use events::{DisconnectReason, Event, EventKind};
pub use lifecycle::{Connection, ConnectionState};
pub use registry::{ConnectionRegistry, ConnectionStatus, TransportFactory};
pub use types::{RemoteProcedure, RequestId};
