//! Byte-level channels to automation servers.
//!
//! A transport only moves bytes: it never parses JSON. Inbound data and
//! closure are reported through a single event channel handed to `open`.
//! Two implementations share the [`Transport`] contract:
//! - [`ProcessTransport`]: a spawned child process's stdio
//! - [`SocketTransport`]: a websocket connection

pub mod process;
pub mod socket;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::codec::Framing;
use super::errors::McpError;

pub use process::ProcessTransport;
pub use socket::SocketTransport;

/// Sender half of a transport's inbound event channel.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Something that happened on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A raw inbound chunk (process) or one complete frame (socket).
    Data(Vec<u8>),
    /// The channel closed without being asked to.
    Closed(CloseReason),
}

/// Why a transport closed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The child process exited. `None` when killed by a signal.
    ProcessExited { exit_code: Option<i32> },
    /// The remote peer closed the socket.
    RemoteClosed { detail: Option<String> },
    /// A read failed mid-session.
    ReadFailed { reason: String },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ProcessExited {
                exit_code: Some(code),
            } => write!(f, "process exited with code {code}"),
            CloseReason::ProcessExited { exit_code: None } => {
                write!(f, "process terminated by signal")
            }
            CloseReason::RemoteClosed { detail: Some(d) } => write!(f, "remote closed: {d}"),
            CloseReason::RemoteClosed { detail: None } => write!(f, "remote closed"),
            CloseReason::ReadFailed { reason } => write!(f, "read failed: {reason}"),
        }
    }
}

/// Contract shared by every transport.
///
/// Implementations use interior mutability so one transport can be shared
/// between the engine (sending) and the connection (closing).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel. Inbound events go to `sink` until `close`.
    async fn open(&self, sink: EventSink) -> Result<(), McpError>;

    /// Write one complete, already-encoded message.
    async fn send(&self, bytes: Vec<u8>) -> Result<(), McpError>;

    /// Release the channel. Idempotent; no events are delivered after it
    /// returns.
    async fn close(&self);

    /// How documents are delimited on this transport.
    fn framing(&self) -> Framing;

    /// Short human-readable endpoint description for logs.
    fn describe(&self) -> String;

    /// Recent diagnostic output (e.g. server stderr), if any.
    fn diagnostics(&self) -> Option<String> {
        None
    }
}
