//! In-memory transport that plays a scripted server, for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::codec::Framing;
use super::errors::McpError;
use super::transport::{CloseReason, EventSink, Transport, TransportEvent};
use super::types::JsonRpcError;

/// What the scripted server does with one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error(JsonRpcError),
    /// Never answer.
    Silent,
    /// Close the channel instead of answering.
    HangUp,
    /// Answer, then close the channel right behind the reply.
    ResultThenHangUp(Value),
}

type Responder = dyn Fn(&str, Option<&Value>) -> Reply + Send + Sync;

/// Scripted line-delimited server.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    sink: StdMutex<Option<EventSink>>,
    sent: StdMutex<Vec<Value>>,
    open_error: StdMutex<Option<McpError>>,
    split_replies: bool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    /// Answer each request with `responder(method, params)`.
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str, Option<&Value>) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self::build(Box::new(responder), false))
    }

    /// Like `new`, but every reply is delivered in two chunks split mid-line.
    pub fn new_split<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str, Option<&Value>) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self::build(Box::new(responder), true))
    }

    /// A server that never answers.
    pub fn silent() -> Arc<Self> {
        Self::new(|_, _| Reply::Silent)
    }

    /// A well-behaved server exposing `tools` and echoing `tools/call`.
    pub fn server(tools: Value) -> Arc<Self> {
        Self::new(move |method, params| match method {
            "initialize" => Reply::Result(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "scripted", "version": "1.0"}
            })),
            "tools/list" => Reply::Result(json!({ "tools": tools.clone() })),
            "tools/call" => Reply::Result(json!({
                "content": [{"type": "text", "text": params.cloned().unwrap_or(Value::Null).to_string()}]
            })),
            _ => Reply::Silent,
        })
    }

    fn build(responder: Box<Responder>, split_replies: bool) -> Self {
        Self {
            responder,
            sink: StdMutex::new(None),
            sent: StdMutex::new(Vec::new()),
            open_error: StdMutex::new(None),
            split_replies,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_open_with(&self, error: McpError) {
        *self.open_error.lock().unwrap() = Some(error);
    }

    /// Every document written so far.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Written documents that carry an id.
    pub fn sent_requests(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|doc| doc.get("id").is_some())
            .collect()
    }

    /// Method names written so far, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|doc| doc["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Deliver raw bytes as if the server wrote them.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.emit(TransportEvent::Data(bytes.to_vec()));
    }

    /// Simulate the server going away.
    pub fn hang_up(&self, reason: CloseReason) {
        self.emit(TransportEvent::Closed(reason));
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            let _ = sink.send(event);
        }
    }

    fn reply(&self, id: &Value, reply: Reply) {
        let document = match reply {
            Reply::Result(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Reply::ResultThenHangUp(result) => {
                self.reply(id, Reply::Result(result));
                self.hang_up(CloseReason::ProcessExited { exit_code: Some(1) });
                return;
            }
            Reply::Error(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
            Reply::Silent => return,
            Reply::HangUp => {
                self.hang_up(CloseReason::ProcessExited { exit_code: Some(1) });
                return;
            }
        };
        let mut line = serde_json::to_vec(&document).unwrap();
        line.push(b'\n');
        if self.split_replies {
            let (head, tail) = line.split_at(10);
            self.push_raw(head);
            self.push_raw(tail);
        } else {
            self.push_raw(&line);
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, sink: EventSink) -> Result<(), McpError> {
        if let Some(err) = self.open_error.lock().unwrap().take() {
            return Err(err);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<(), McpError> {
        if self.sink.lock().unwrap().is_none() {
            return Err(McpError::NotConnected {
                name: "scripted".into(),
            });
        }
        assert_eq!(bytes.last(), Some(&b'\n'), "outbound line must end in newline");
        let document: Value = serde_json::from_slice(&bytes).unwrap();
        self.sent.lock().unwrap().push(document.clone());

        if let (Some(id), Some(method)) = (document.get("id"), document["method"].as_str()) {
            let reply = (self.responder)(method, document.get("params"));
            self.reply(id, reply);
        }
        Ok(())
    }

    async fn close(&self) {
        if self.sink.lock().unwrap().take().is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn framing(&self) -> Framing {
        Framing::LineDelimited
    }

    fn describe(&self) -> String {
        "scripted".into()
    }

    fn diagnostics(&self) -> Option<String> {
        Some("scripted stderr".into())
    }
}
