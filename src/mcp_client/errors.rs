//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// A required config field is missing or invalid for the transport kind.
    #[error("config error for '{name}': {reason}")]
    Config {
        name: String,
        reason: String,
    },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// Socket connect failure, I/O error, or unexpected mid-session closure.
    #[error("transport error for '{name}': {reason}")]
    TransportError {
        name: String,
        reason: String,
    },

    /// Malformed message on the wire. Contained at the decoder, never
    /// returned to callers.
    #[error("protocol error: {reason}")]
    Protocol {
        reason: String,
    },

    /// The initialization handshake or tool discovery failed.
    #[error("'{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No response arrived before the call's deadline.
    #[error("call '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        timeout_ms: u64,
    },

    /// The connection was torn down while the call was pending.
    #[error("'{name}' disconnected: {reason}")]
    Disconnected {
        name: String,
        reason: String,
    },

    /// The transport or connection is not open.
    #[error("'{name}' is not connected")]
    NotConnected {
        name: String,
    },

    /// The connection cannot perform the operation in its current state.
    #[error("'{name}' cannot {operation} while {state}")]
    InvalidState {
        name: String,
        operation: String,
        state: String,
    },

    /// Registry operation referencing an unknown connection name.
    #[error("unknown connection: '{name}'")]
    NotFound {
        name: String,
    },

    /// Tool not found in the catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// Reading or writing the connection list failed.
    #[error("failed to persist '{path}': {reason}")]
    Persistence {
        path: String,
        reason: String,
    },
}

impl McpError {
    /// Whether this error ended the connection rather than a single call.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. }
                | McpError::TransportError { .. }
                | McpError::Disconnected { .. }
                | McpError::InitFailed { .. }
        )
    }
}
