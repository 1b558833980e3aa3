//! Message framing between a raw transport stream and JSON-RPC documents.
//!
//! Process transports carry newline-delimited JSON (one document per line,
//! possibly split or batched arbitrarily across reads). Socket transports
//! deliver one document per frame. Malformed input is logged and dropped
//! here; it never reaches the connection's control flow.

use serde::Serialize;

use super::errors::McpError;
use super::types::{JsonRpcError, JsonRpcResponse, RequestId};

/// Upper bound on a single buffered line (16 MB). A peer that streams more
/// than this without a newline has its buffer discarded.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

// ─── Framing ────────────────────────────────────────────────────────────────

/// How documents are delimited on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON document per `\n`-terminated line (process stdio).
    LineDelimited,
    /// Every inbound unit is exactly one document (websocket frames).
    MessagePerFrame,
}

/// Serialize one outbound document, appending the line delimiter when the
/// framing requires it.
pub fn encode<T: Serialize>(framing: Framing, document: &T) -> Result<Vec<u8>, McpError> {
    let mut bytes = serde_json::to_vec(document).map_err(|e| McpError::Protocol {
        reason: format!("failed to serialize message: {e}"),
    })?;
    if framing == Framing::LineDelimited {
        bytes.push(b'\n');
    }
    Ok(bytes)
}

// ─── Inbound Messages ───────────────────────────────────────────────────────

/// A decoded inbound document.
///
/// Anything carrying a `method` is a notification from the correlation
/// engine's point of view (server-initiated requests included); anything
/// else carrying an `id` is a response.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response(JsonRpcResponse),
    Notification {
        method: String,
        params: Option<serde_json::Value>,
        raw: serde_json::Value,
    },
}

impl InboundMessage {
    /// Classify a parsed JSON document.
    pub fn from_value(value: serde_json::Value) -> Result<Self, McpError> {
        let serde_json::Value::Object(obj) = &value else {
            return Err(McpError::Protocol {
                reason: "expected a JSON object".into(),
            });
        };

        if let Some(method) = obj.get("method") {
            let method = method
                .as_str()
                .ok_or(McpError::Protocol {
                    reason: "'method' is not a string".into(),
                })?
                .to_string();
            let params = obj.get("params").cloned();
            return Ok(InboundMessage::Notification {
                method,
                params,
                raw: value,
            });
        }

        let Some(id) = obj.get("id") else {
            return Err(McpError::Protocol {
                reason: "document has neither 'id' nor 'method'".into(),
            });
        };

        let id = if id.is_null() {
            None
        } else {
            Some(
                serde_json::from_value::<RequestId>(id.clone()).map_err(|e| {
                    McpError::Protocol {
                        reason: format!("unsupported id {id}: {e}"),
                    }
                })?,
            )
        };

        let error = match obj.get("error") {
            None | Some(serde_json::Value::Null) => None,
            Some(err) => Some(
                serde_json::from_value::<JsonRpcError>(err.clone()).map_err(|e| {
                    McpError::Protocol {
                        reason: format!("malformed error object: {e}"),
                    }
                })?,
            ),
        };

        Ok(InboundMessage::Response(JsonRpcResponse {
            id,
            result: obj.get("result").cloned(),
            error,
        }))
    }
}

/// Parse one complete document.
fn parse_document(bytes: &[u8]) -> Result<InboundMessage, McpError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| McpError::Protocol {
            reason: format!("invalid JSON: {e}"),
        })?;
    InboundMessage::from_value(value)
}

// ─── Decoder ────────────────────────────────────────────────────────────────

/// Stateful decoder turning transport chunks into inbound messages.
#[derive(Debug)]
pub struct FrameDecoder {
    connection: String,
    framing: Framing,
    buffer: Vec<u8>,
    /// Leading bytes of `buffer` already known to hold no newline.
    scanned: usize,
    dropped: u64,
}

impl FrameDecoder {
    /// Create a decoder for one connection.
    pub fn new(connection: &str, framing: Framing) -> Self {
        Self {
            connection: connection.to_string(),
            framing,
            buffer: Vec::new(),
            scanned: 0,
            dropped: 0,
        }
    }

    /// Feed one inbound chunk and return every complete message it finished.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        match self.framing {
            Framing::MessagePerFrame => self.accept(chunk, &mut messages),
            Framing::LineDelimited => {
                let mut buffer = std::mem::take(&mut self.buffer);
                buffer.extend_from_slice(chunk);

                let mut start = 0;
                let mut from = self.scanned;
                while let Some(offset) = buffer[from..].iter().position(|b| *b == b'\n') {
                    let end = from + offset;
                    self.accept(&buffer[start..end], &mut messages);
                    start = end + 1;
                    from = start;
                }
                buffer.drain(..start);
                self.scanned = buffer.len();
                self.buffer = buffer;

                if self.buffer.len() > MAX_LINE_BYTES {
                    tracing::warn!(
                        connection = %self.connection,
                        buffered = self.buffer.len(),
                        "discarding oversized unterminated line"
                    );
                    self.buffer.clear();
                    self.scanned = 0;
                    self.dropped += 1;
                }
            }
        }
        messages
    }

    /// Bytes held back waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of documents dropped as malformed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn accept(&mut self, bytes: &[u8], out: &mut Vec<InboundMessage>) {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.trim(),
            Err(e) => {
                self.drop_document(&McpError::Protocol {
                    reason: format!("invalid UTF-8: {e}"),
                });
                return;
            }
        };
        if text.is_empty() {
            return;
        }
        match parse_document(text.as_bytes()) {
            Ok(message) => out.push(message),
            Err(e) => self.drop_document(&e),
        }
    }

    fn drop_document(&mut self, error: &McpError) {
        self.dropped += 1;
        tracing::warn!(
            connection = %self.connection,
            error = %error,
            "dropping malformed inbound message"
        );
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
