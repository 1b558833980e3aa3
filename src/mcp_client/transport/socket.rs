//! Websocket transport.
//!
//! Each text or binary frame carries exactly one JSON-RPC document, so no
//! re-framing is needed. Ping/pong is handled by the websocket library.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{CloseReason, EventSink, Transport, TransportEvent};
use crate::mcp_client::codec::Framing;
use crate::mcp_client::errors::McpError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport backed by a websocket connection.
pub struct SocketTransport {
    name: String,
    url: String,
    connect_timeout: Duration,
    writer: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    /// Create a transport for `url`. Nothing is connected until `open`.
    pub fn new(name: &str, url: &str, connect_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            connect_timeout,
            writer: Mutex::new(None),
            reader: StdMutex::new(None),
        }
    }

    /// Validate the configured URL.
    fn parse_url(&self) -> Result<url::Url, McpError> {
        let config_error = |reason: String| McpError::Config {
            name: self.name.clone(),
            reason,
        };

        if self.url.trim().is_empty() {
            return Err(config_error("socket transport requires a url".into()));
        }
        let url = url::Url::parse(self.url.trim())
            .map_err(|e| config_error(format!("invalid url '{}': {e}", self.url)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(config_error(format!(
                "unsupported url scheme '{other}' (expected ws or wss)"
            ))),
        }
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            name: self.name.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn open(&self, sink: EventSink) -> Result<(), McpError> {
        let url = self.parse_url()?;

        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Ok(());
        }

        let connect = connect_async(url.as_str());
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                self.transport_error(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| self.transport_error(format!("websocket connect failed: {e}")))?;

        tracing::info!(connection = %self.name, url = %url, "websocket connected");

        let (write_half, read_half) = stream.split();
        *writer = Some(write_half);

        let handle = tokio::spawn(pump_frames(self.name.clone(), read_half, sink));
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }

        Ok(())
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<(), McpError> {
        let text = String::from_utf8(bytes).map_err(|e| McpError::Protocol {
            reason: format!("outbound message is not UTF-8: {e}"),
        })?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| McpError::NotConnected {
            name: self.name.clone(),
        })?;

        writer
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| self.transport_error(format!("failed to send frame: {e}")))
    }

    async fn close(&self) {
        let reader = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!(connection = %self.name, error = %e, "close frame not delivered");
            }
        }
    }

    fn framing(&self) -> Framing {
        Framing::MessagePerFrame
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Forward data frames until the peer closes or the stream fails.
async fn pump_frames(name: String, mut stream: SplitStream<WsStream>, sink: EventSink) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                if sink.send(TransportEvent::Data(text.into_bytes())).is_err() {
                    return;
                }
            }
            Some(Ok(WsMessage::Binary(data))) => {
                if sink.send(TransportEvent::Data(data)).is_err() {
                    return;
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                break CloseReason::RemoteClosed {
                    detail: frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty()),
                };
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
            Some(Err(e)) => {
                break CloseReason::ReadFailed {
                    reason: e.to_string(),
                };
            }
            None => break CloseReason::RemoteClosed { detail: None },
        }
    };

    tracing::info!(connection = %name, reason = %reason, "websocket stream ended");
    let _ = sink.send(TransportEvent::Closed(reason));
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn open_err(url: &str) -> McpError {
        let transport = SocketTransport::new("ws", url, Duration::from_secs(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap_err()
    }

    #[tokio::test]
    async fn test_missing_url_is_config_error() {
        assert!(matches!(open_err("").await, McpError::Config { .. }));
    }

    #[tokio::test]
    async fn test_non_websocket_scheme_is_config_error() {
        assert!(matches!(
            open_err("http://localhost:1").await,
            McpError::Config { .. }
        ));
        assert!(matches!(open_err("not a url").await, McpError::Config { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Bind then drop to get a port nobody is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = open_err(&format!("ws://{addr}")).await;
        assert!(matches!(err, McpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_frames_delivered_and_remote_close_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // Echo one frame back, then close.
            if let Some(Ok(msg)) = ws.next().await {
                ws.send(msg).await.unwrap();
            }
            let _ = ws.close(None).await;
        });

        let transport = SocketTransport::new("ws", &format!("ws://{addr}"), Duration::from_secs(5));
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();
        transport
            .send(br#"{"jsonrpc":"2.0","method":"x"}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Data(br#"{"jsonrpc":"2.0","method":"x"}"#.to_vec())
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::Closed(CloseReason::RemoteClosed { .. })
        ));

        transport.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_open_is_not_connected() {
        let transport = SocketTransport::new("ws", "ws://127.0.0.1:1", Duration::from_secs(1));
        let err = transport.send(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, McpError::NotConnected { .. }));
    }
}
