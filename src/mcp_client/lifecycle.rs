//! Connection lifecycle.
//!
//! A [`Connection`] binds one config to one transport and walks it through
//! `Idle → Connecting → Handshaking → Discovering → Ready`, then
//! `Disconnecting → Closed` on teardown. Any failure before Ready lands in
//! `Errored`. Both terminal states are final: a connection is used once and
//! replaced by its registry, never revived.
//!
//! Each connection owns one pump task that drains the transport's event
//! channel, decodes frames, and dispatches them in arrival order.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::codec::{FrameDecoder, InboundMessage};
use super::config::ConnectionConfig;
use super::errors::McpError;
use super::events::{DisconnectReason, Event, EventEmitter, EventKind};
use super::rpc::RpcEngine;
use super::transport::{CloseReason, Transport, TransportEvent};
use super::types::{InitializeResult, ListToolsResult, RemoteProcedure};
use crate::settings::ClientSettings;

// ─── State ──────────────────────────────────────────────────────────────────

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Discovering,
    Ready,
    Disconnecting,
    Closed,
    Errored,
}

impl ConnectionState {
    /// Closed or Errored.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    fn is_tearing_down(self) -> bool {
        matches!(self, ConnectionState::Disconnecting | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

// ─── Connection ─────────────────────────────────────────────────────────────

/// One live session with an automation server.
pub struct Connection {
    config: ConnectionConfig,
    instance: Uuid,
    settings: ClientSettings,
    transport: Arc<dyn Transport>,
    engine: RpcEngine,
    state: StdMutex<ConnectionState>,
    tools: RwLock<Vec<RemoteProcedure>>,
    server: StdMutex<Option<InitializeResult>>,
    last_error: StdMutex<Option<String>>,
    /// Set when the transport closes before the connection reached Ready.
    closed_early: StdMutex<Option<String>>,
    events: EventEmitter,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.config.name)
            .field("instance", &self.instance)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Bind `config` to `transport`. Nothing happens on the wire until
    /// [`connect`](Self::connect).
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        settings: ClientSettings,
        events: broadcast::Sender<Event>,
    ) -> Arc<Self> {
        let instance = Uuid::new_v4();
        let engine = RpcEngine::new(&config.name, Arc::clone(&transport), settings.call_timeout());
        let events = EventEmitter::new(&config.name, instance, events);
        Arc::new(Self {
            config,
            instance,
            settings,
            transport,
            engine,
            state: StdMutex::new(ConnectionState::Idle),
            tools: RwLock::new(Vec::new()),
            server: StdMutex::new(None),
            last_error: StdMutex::new(None),
            closed_early: StdMutex::new(None),
            events,
            pump: StdMutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Unique id of this incarnation; a reconnect gets a new one.
    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Errored)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Procedures from the most recent discovery.
    pub fn tools(&self) -> Vec<RemoteProcedure> {
        self.tools.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// The server's `initialize` answer, once handshaking succeeded.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.lock().ok().and_then(|s| s.clone())
    }

    /// Why the connection ended up Errored, if it did.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.engine.pending_count()
    }

    // ─── Connect ─────────────────────────────────────────────────────────

    /// Open the transport, handshake, and discover tools.
    ///
    /// A no-op when already Ready. Fails with `InvalidState` on a connection
    /// that has already been used up.
    pub async fn connect(self: &Arc<Self>) -> Result<(), McpError> {
        {
            let mut state = self.lock_state()?;
            match *state {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Idle => *state = ConnectionState::Connecting,
                other => {
                    return Err(McpError::InvalidState {
                        name: self.name().to_string(),
                        operation: "connect".into(),
                        state: other.to_string(),
                    })
                }
            }
        }

        tracing::info!(
            connection = %self.name(),
            transport = %self.config.transport.kind(),
            endpoint = %self.transport.describe(),
            instance = %self.instance,
            "connecting"
        );

        let timeout = self.settings.connect_timeout();
        let outcome = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.init_failed(format!(
                "handshake timed out after {}ms",
                timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(tools) => {
                let count = tools.len();
                if let Err(e) = self.advance(ConnectionState::Discovering, ConnectionState::Ready) {
                    return Err(self.fail(e).await);
                }
                self.events.emit(EventKind::ToolsDiscovered(tools));
                self.events.emit(EventKind::Connected);
                tracing::info!(connection = %self.name(), tools = count, "connection ready");
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn establish(self: &Arc<Self>) -> Result<Vec<RemoteProcedure>, McpError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.open(tx).await?;
        self.spawn_pump(rx);

        self.advance(ConnectionState::Connecting, ConnectionState::Handshaking)?;
        self.handshake()
            .await
            .map_err(|e| self.init_failed(e.to_string()))?;

        self.advance(ConnectionState::Handshaking, ConnectionState::Discovering)?;
        let tools = self
            .list_tools()
            .await
            .map_err(|e| self.init_failed(format!("tool discovery failed: {e}")))?;

        if let Ok(mut slot) = self.tools.write() {
            *slot = tools.clone();
        }
        Ok(tools)
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let result = self
            .engine
            .call("initialize", Some(self.settings.initialize_params()))
            .await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        tracing::info!(
            connection = %self.name(),
            protocol = ?init.protocol_version,
            server = ?init.server_info.as_ref().and_then(|s| s.name.as_deref()),
            "handshake complete"
        );
        if let Ok(mut slot) = self.server.lock() {
            *slot = Some(init);
        }

        self.engine.notify("notifications/initialized", None).await
    }

    /// Page through `tools/list` until the server stops returning a cursor.
    async fn list_tools(&self) -> Result<Vec<RemoteProcedure>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = self.engine.call("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::Protocol {
                    reason: format!("failed to parse tools/list response: {e}"),
                })?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() && seen.insert(next.clone()) => {
                    cursor = Some(next);
                }
                Some(next) if !next.is_empty() => {
                    tracing::warn!(
                        connection = %self.name(),
                        cursor = %next,
                        "tools/list cursor repeated, stopping"
                    );
                    break;
                }
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Undo a failed connect: reject pending calls, release the transport,
    /// and park in Errored (unless a disconnect got there first).
    async fn fail(&self, error: McpError) -> McpError {
        self.engine.fail_all("connect failed");
        self.transport.close().await;
        self.stop_pump().await;

        let parked = match self.state.lock() {
            Ok(mut state) if !state.is_tearing_down() => {
                *state = ConnectionState::Errored;
                true
            }
            _ => false,
        };
        if parked {
            if let Ok(mut slot) = self.last_error.lock() {
                *slot = Some(error.to_string());
            }
            self.events.emit(EventKind::Error(error.to_string()));
        }

        tracing::warn!(connection = %self.name(), error = %error, "connect failed");
        error
    }

    fn init_failed(&self, reason: String) -> McpError {
        let stderr = self.transport.diagnostics().unwrap_or_default();
        if !stderr.is_empty() {
            tracing::warn!(
                connection = %self.name(),
                stderr = %stderr,
                "server stderr captured on failure"
            );
        }
        McpError::InitFailed {
            name: self.name().to_string(),
            reason: format!("{reason}{}", format_stderr_suffix(&stderr)),
        }
    }

    // ─── Ready operations ────────────────────────────────────────────────

    /// Arbitrary request on a Ready connection.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        self.ensure_ready()?;
        self.engine.call(method, params).await
    }

    /// Arbitrary notification on a Ready connection.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.ensure_ready()?;
        self.engine.notify(method, params).await
    }

    /// Invoke a tool by its server-side name.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        self.ensure_ready()?;
        tracing::info!(connection = %self.name(), tool, "calling tool");
        self.engine
            .call(
                "tools/call",
                Some(serde_json::json!({ "name": tool, "arguments": arguments })),
            )
            .await
    }

    /// Re-run discovery and replace the tool set.
    pub async fn refresh_tools(&self) -> Result<Vec<RemoteProcedure>, McpError> {
        self.ensure_ready()?;
        let tools = self.list_tools().await?;
        if let Ok(mut slot) = self.tools.write() {
            *slot = tools.clone();
        }
        tracing::info!(connection = %self.name(), tools = tools.len(), "tools refreshed");
        self.events.emit(EventKind::ToolsDiscovered(tools.clone()));
        Ok(tools)
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(McpError::NotConnected {
                name: self.name().to_string(),
            })
        }
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Tear the connection down. Pending calls are rejected before the
    /// transport closes. A no-op once Disconnecting, Closed or Errored.
    pub async fn disconnect(&self) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.is_tearing_down() || *state == ConnectionState::Errored {
                return;
            }
            *state = ConnectionState::Disconnecting;
        }

        tracing::info!(connection = %self.name(), "disconnecting");
        self.finish_teardown("disconnected by client", DisconnectReason::Explicit)
            .await;
        self.stop_pump().await;
    }

    async fn finish_teardown(&self, detail: &str, reason: DisconnectReason) {
        self.engine.fail_all(detail);
        self.transport.close().await;
        if let Ok(mut state) = self.state.lock() {
            *state = ConnectionState::Closed;
        }
        self.events.emit(EventKind::Disconnected(reason));
    }

    async fn on_transport_closed(&self, reason: CloseReason) {
        let was_ready = match self.state.lock() {
            Ok(mut state) => match *state {
                ConnectionState::Ready => {
                    *state = ConnectionState::Disconnecting;
                    true
                }
                ConnectionState::Connecting
                | ConnectionState::Handshaking
                | ConnectionState::Discovering => {
                    if let Ok(mut slot) = self.closed_early.lock() {
                        *slot = Some(reason.to_string());
                    }
                    false
                }
                _ => false,
            },
            Err(_) => return,
        };

        if was_ready {
            tracing::warn!(connection = %self.name(), reason = %reason, "server went away");
            self.finish_teardown(&reason.to_string(), DisconnectReason::from(&reason))
                .await;
        } else if !self.state().is_tearing_down() {
            // Mid-connect: the in-flight call fails, and the next advance()
            // sees closed_early, so connect() parks the connection in Errored.
            self.engine.fail_all(&reason.to_string());
        }
    }

    // ─── Pump ────────────────────────────────────────────────────────────

    fn spawn_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut decoder = FrameDecoder::new(self.name(), self.transport.framing());

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(conn) = weak.upgrade() else {
                    return;
                };
                match event {
                    TransportEvent::Data(chunk) => {
                        for message in decoder.decode(&chunk) {
                            conn.dispatch(message);
                        }
                    }
                    TransportEvent::Closed(reason) => {
                        conn.on_transport_closed(reason).await;
                        return;
                    }
                }
            }
        });

        if let Ok(mut slot) = self.pump.lock() {
            *slot = Some(handle);
        }
    }

    fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::Response(response) => self.engine.complete(response),
            InboundMessage::Notification { method, raw, .. } => {
                if self.state().is_tearing_down() {
                    return;
                }
                tracing::debug!(connection = %self.name(), method = %method, "server notification");
                self.events.emit(EventKind::Notification(raw));
            }
        }
    }

    async fn stop_pump(&self) {
        let handle = self.pump.lock().ok().and_then(|mut p| p.take());
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    // ─── State helpers ───────────────────────────────────────────────────

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ConnectionState>, McpError> {
        self.state.lock().map_err(|_| McpError::InvalidState {
            name: self.name().to_string(),
            operation: "lock state".into(),
            state: "poisoned".into(),
        })
    }

    /// Move `from → to`, failing if something else (a disconnect) moved the
    /// state in the meantime or the transport already closed.
    fn advance(&self, from: ConnectionState, to: ConnectionState) -> Result<(), McpError> {
        let mut state = self.lock_state()?;
        if *state != from {
            return Err(McpError::Disconnected {
                name: self.name().to_string(),
                reason: format!("connection became {} while {from}", *state),
            });
        }
        let closed = self.closed_early.lock().ok().and_then(|slot| slot.clone());
        if let Some(reason) = closed {
            return Err(self.init_failed(format!("transport closed while {from}: {reason}")));
        }
        *state = to;
        Ok(())
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
