//! Child-process transport over stdio.
//!
//! Handles low-level communication with automation server child processes:
//! - Writing newline-terminated JSON-RPC documents to stdin
//! - Forwarding raw stdout chunks to the owner (framing happens upstream)
//! - Capturing stderr for diagnostics only, never as protocol traffic
//! - Reporting process exit (with exit code) as a close event

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{CloseReason, EventSink, Transport, TransportEvent};
use crate::mcp_client::codec::Framing;
use crate::mcp_client::config::ProcessCommand;
use crate::mcp_client::errors::McpError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Number of stderr lines retained for error messages.
const STDERR_TAIL_LINES: usize = 50;

/// Read buffer size for stdout.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long to wait for an exit status after stdout reaches EOF.
const EXIT_STATUS_WAIT: Duration = Duration::from_secs(2);

// ─── ProcessTransport ───────────────────────────────────────────────────────

/// Transport backed by a spawned child process.
pub struct ProcessTransport {
    name: String,
    command: ProcessCommand,
    shutdown_timeout: Duration,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Mutex<Option<ChildStdin>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
}

impl ProcessTransport {
    /// Create a transport for `command`. Nothing is spawned until `open`.
    pub fn new(name: &str, command: ProcessCommand, shutdown_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            command,
            shutdown_timeout,
            child: Arc::new(Mutex::new(None)),
            stdin: Mutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            stderr_tail: Arc::new(StdMutex::new(VecDeque::new())),
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.command.command);
        cmd.args(&self.command.args);

        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = self.command.working_dir.as_deref() {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn_failed(&self, reason: impl Into<String>) -> McpError {
        McpError::SpawnFailed {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn open(&self, sink: EventSink) -> Result<(), McpError> {
        if self.command.command.trim().is_empty() {
            return Err(McpError::Config {
                name: self.name.clone(),
                reason: "process transport requires a command".into(),
            });
        }

        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Ok(());
        }

        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| self.spawn_failed(format!("{e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.spawn_failed("failed to capture stdout"))?;
        let stderr = child.stderr.take();

        tracing::info!(
            connection = %self.name,
            command = %self.command.command,
            pid = child.id(),
            "spawned server process"
        );

        *child_slot = Some(child);
        drop(child_slot);
        *self.stdin.lock().await = Some(stdin);

        self.track(tokio::spawn(pump_stdout(
            self.name.clone(),
            stdout,
            Arc::clone(&self.child),
            sink,
        )));
        if let Some(stderr) = stderr {
            self.track(tokio::spawn(capture_stderr(
                self.name.clone(),
                stderr,
                Arc::clone(&self.stderr_tail),
            )));
        }

        Ok(())
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<(), McpError> {
        let mut guard = self.stdin.lock().await;
        let writer = guard.as_mut().ok_or_else(|| McpError::NotConnected {
            name: self.name.clone(),
        })?;

        writer
            .write_all(&bytes)
            .await
            .map_err(|e| McpError::TransportError {
                name: self.name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            name: self.name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })?;

        Ok(())
    }

    async fn close(&self) {
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        // Dropping stdin lets a well-behaved server exit on EOF.
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(connection = %self.name, %status, "server process exited");
            }
            _ => {
                tracing::warn!(
                    connection = %self.name,
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "server did not exit in time, killing"
                );
                let _ = child.kill().await;
            }
        }
    }

    fn framing(&self) -> Framing {
        Framing::LineDelimited
    }

    fn describe(&self) -> String {
        if self.command.args.is_empty() {
            self.command.command.clone()
        } else {
            format!("{} {}", self.command.command, self.command.args.join(" "))
        }
    }

    fn diagnostics(&self) -> Option<String> {
        let tail = self.stderr_tail.lock().ok()?;
        if tail.is_empty() {
            return None;
        }
        Some(tail.iter().cloned().collect::<Vec<_>>().join("\n"))
    }
}

// ─── Background Tasks ───────────────────────────────────────────────────────

/// Forward stdout chunks until EOF, then report how the process ended.
async fn pump_stdout(
    name: String,
    mut stdout: ChildStdout,
    child: Arc<Mutex<Option<Child>>>,
    sink: EventSink,
) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let read_error = loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                if sink.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    let reason = match read_error {
        Some(reason) => CloseReason::ReadFailed { reason },
        None => {
            let mut guard = child.lock().await;
            match guard.as_mut() {
                Some(child) => match tokio::time::timeout(EXIT_STATUS_WAIT, child.wait()).await {
                    Ok(Ok(status)) => CloseReason::ProcessExited {
                        exit_code: status.code(),
                    },
                    _ => CloseReason::RemoteClosed {
                        detail: Some("stdout closed".into()),
                    },
                },
                None => return,
            }
        }
    };

    tracing::info!(connection = %name, reason = %reason, "server stream ended");
    let _ = sink.send(TransportEvent::Closed(reason));
}

/// Log stderr lines and keep the most recent ones for error reports.
async fn capture_stderr(
    name: String,
    stderr: ChildStderr,
    tail: Arc<StdMutex<VecDeque<String>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(connection = %name, line = %line, "server stderr");
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
