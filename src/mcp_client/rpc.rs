//! Request/response correlation over one transport.
//!
//! Ids are allocated sequentially from 1 and never reused. Every in-flight
//! call holds an entry in the pending table until exactly one of response,
//! timeout, teardown, or the caller dropping its future removes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use super::codec::{self, Framing};
use super::errors::McpError;
use super::transport::Transport;
use super::types::{error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

type Responder = oneshot::Sender<Result<serde_json::Value, McpError>>;

/// One outstanding call.
struct PendingCall {
    method: String,
    responder: Responder,
    issued_at: Instant,
}

type PendingTable = Arc<StdMutex<HashMap<RequestId, PendingCall>>>;

/// Removes a call's entry if its future is dropped before completion.
struct PendingGuard {
    table: PendingTable,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut table) = self.table.lock() {
            table.remove(&self.id);
        }
    }
}

// ─── RpcEngine ──────────────────────────────────────────────────────────────

/// JSON-RPC client half bound to one transport.
pub struct RpcEngine {
    connection: String,
    transport: Arc<dyn Transport>,
    framing: Framing,
    next_id: AtomicU64,
    pending: PendingTable,
    call_timeout: Duration,
}

impl RpcEngine {
    /// Create an engine. Ids start at 1.
    pub fn new(connection: &str, transport: Arc<dyn Transport>, call_timeout: Duration) -> Self {
        let framing = transport.framing();
        Self {
            connection: connection.to_string(),
            transport,
            framing,
            next_id: AtomicU64::new(1),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            call_timeout,
        }
    }

    /// Default per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Send a request and wait for its response with the default timeout.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        self.call_with_timeout(method, params, self.call_timeout).await
    }

    /// Send a request and wait for its response for at most `timeout`.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();

        self.pending_table()?.insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                responder: tx,
                issued_at: Instant::now(),
            },
        );
        let _guard = PendingGuard {
            table: Arc::clone(&self.pending),
            id: id.clone(),
        };

        let request = JsonRpcRequest::new(id.clone(), method, params);
        let bytes = codec::encode(self.framing, &request)?;

        tracing::debug!(connection = %self.connection, id = %id, method, "sending request");
        self.transport.send(bytes).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Disconnected {
                name: self.connection.clone(),
                reason: "call abandoned".into(),
            }),
            Err(_) => {
                tracing::warn!(
                    connection = %self.connection,
                    id = %id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "call timed out"
                );
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification. No id is allocated and no reply is awaited.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let bytes = codec::encode(self.framing, &notification)?;
        tracing::debug!(connection = %self.connection, method, "sending notification");
        self.transport.send(bytes).await
    }

    /// Route an inbound response to the call that is waiting for it.
    pub fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            tracing::debug!(connection = %self.connection, "ignoring response without id");
            return;
        };

        let entry = match self.pending.lock() {
            Ok(mut table) => table.remove(&id),
            Err(_) => None,
        };
        let Some(call) = entry else {
            tracing::debug!(connection = %self.connection, id = %id, "ignoring response for unknown id");
            return;
        };

        tracing::debug!(
            connection = %self.connection,
            id = %id,
            method = %call.method,
            elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
            "response received"
        );

        let outcome = match (response.error, response.result) {
            (Some(err), _) => Err(McpError::ServerError {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(McpError::ServerError {
                code: error_codes::INTERNAL_ERROR,
                message: "response carried neither result nor error".into(),
                data: None,
            }),
        };
        // The caller may have given up already.
        let _ = call.responder.send(outcome);
    }

    /// Reject every outstanding call with `Disconnected` and empty the table.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(RequestId, PendingCall)> = match self.pending.lock() {
            Ok(mut table) => table.drain().collect(),
            Err(_) => Vec::new(),
        };
        let count = drained.len();
        for (id, call) in drained {
            tracing::debug!(
                connection = %self.connection,
                id = %id,
                method = %call.method,
                "rejecting pending call"
            );
            let _ = call.responder.send(Err(McpError::Disconnected {
                name: self.connection.clone(),
                reason: reason.to_string(),
            }));
        }
        if count > 0 {
            tracing::info!(connection = %self.connection, count, reason, "failed pending calls");
        }
        count
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn pending_table(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<RequestId, PendingCall>>, McpError> {
        self.pending.lock().map_err(|_| McpError::Protocol {
            reason: "pending call table poisoned".into(),
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
