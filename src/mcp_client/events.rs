//! Connection events for the presentation layer.
//!
//! Every event carries the connection name, the id of the connection
//! incarnation that produced it, and a UTC timestamp. Events are fanned out
//! over a `tokio::sync::broadcast` channel; slow subscribers lose the oldest
//! events rather than blocking connections.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::transport::CloseReason;
use super::types::RemoteProcedure;

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One lifecycle or protocol event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub connection: String,
    pub instance: Uuid,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EventKind {
    /// Handshake and discovery finished. Emitted once per connection.
    Connected,
    Disconnected(DisconnectReason),
    ToolsDiscovered(Vec<RemoteProcedure>),
    /// A server notification or server-initiated request, untouched.
    Notification(serde_json::Value),
    Error(String),
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "by", rename_all = "camelCase")]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Explicit,
    /// The transport closed on its own.
    Remote {
        detail: String,
        exit_code: Option<i32>,
    },
}

impl From<&CloseReason> for DisconnectReason {
    fn from(reason: &CloseReason) -> Self {
        let exit_code = match reason {
            CloseReason::ProcessExited { exit_code } => *exit_code,
            _ => None,
        };
        DisconnectReason::Remote {
            detail: reason.to_string(),
            exit_code,
        }
    }
}

// ─── Emitter ────────────────────────────────────────────────────────────────

/// Stamps and publishes events for one connection incarnation.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    connection: String,
    instance: Uuid,
    tx: broadcast::Sender<Event>,
}

impl EventEmitter {
    pub fn new(connection: &str, instance: Uuid, tx: broadcast::Sender<Event>) -> Self {
        Self {
            connection: connection.to_string(),
            instance,
            tx,
        }
    }

    /// Publish `kind`. Having no subscribers is not an error.
    pub fn emit(&self, kind: EventKind) {
        let _ = self.tx.send(Event {
            connection: self.connection.clone(),
            instance: self.instance,
            at: Utc::now(),
            kind,
        });
    }
}

/// A fresh event channel.
pub fn channel() -> broadcast::Sender<Event> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
