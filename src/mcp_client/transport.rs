//! JSON-RPC transports.
//!
//! A [`Transport`] moves JSON-RPC envelopes to one server and back. This
//! module holds the trait and the stdio implementation:
//! - Writing JSON-RPC requests to a child process's stdin
//! - Reading JSON-RPC responses from its stdout
//! - Line-delimited JSON protocol (one JSON object per line)
//!
//! The HTTP/SSE implementation lives in [`super::sse`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::lifecycle;
use super::types::{JsonRpcRequest, JsonRpcResponse};

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// A bidirectional JSON-RPC channel to one server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response with the matching id.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>)
        -> Result<(), McpError>;

    /// Tear the channel down. Safe to call more than once.
    async fn close(&self) -> Result<(), McpError>;

    /// Whether the channel is believed usable.
    fn is_open(&self) -> bool;

    /// Recent diagnostic output from the peer, if the transport collects any.
    async fn stderr_tail(&self) -> String {
        String::new()
    }
}

// ─── Stdio Transport ─────────────────────────────────────────────────────────

/// Writer/reader pair, locked together so one request/response exchange
/// never interleaves with another on the same pipe.
struct StdioPipes {
    writer: ChildStdin,
    reader: BufReader<ChildStdout>,
}

/// JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    next_id: AtomicU64,
    /// `None` once closed; dropping the pipes closes the child's stdin.
    pipes: Mutex<Option<StdioPipes>>,
    process: Mutex<Option<Child>>,
    open: AtomicBool,
    stderr_tail: Arc<Mutex<String>>,
}

impl StdioTransport {
    /// Create a new transport that owns the child process.
    pub fn new(server_name: &str, child: Child, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            server_name: server_name.to_string(),
            next_id: AtomicU64::new(1),
            pipes: Mutex::new(Some(StdioPipes {
                writer: stdin,
                reader: BufReader::new(stdout),
            })),
            process: Mutex::new(Some(child)),
            open: AtomicBool::new(true),
            stderr_tail: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Share the buffer the stderr drain task writes into.
    pub fn with_stderr_tail(mut self, tail: Arc<Mutex<String>>) -> Self {
        self.stderr_tail = tail;
        self
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    fn not_connected(&self) -> McpError {
        McpError::NotConnected {
            name: self.server_name.clone(),
        }
    }

    async fn write_line(&self, writer: &mut ChildStdin, mut json: String) -> Result<(), McpError> {
        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        if !self.is_open() {
            return Err(McpError::NotConnected {
                name: self.server_name.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        let mut guard = self.pipes.lock().await;
        let pipes = guard.as_mut().ok_or_else(|| self.not_connected())?;
        self.write_line(&mut pipes.writer, json).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = pipes
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                self.open.store(false, Ordering::SeqCst);
                return Err(self.transport_error(
                    "server stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == Some(id) => return Ok(resp),
                // Notifications, stale replies from timed-out requests
                Ok(_) => continue,
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = %trimmed, "skipping non-JSON-RPC stdout line");
                    continue;
                }
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or_else(|| serde_json::json!({})),
        });
        let json = serde_json::to_string(&notification).map_err(|e| {
            self.transport_error(format!("failed to serialize notification: {e}"))
        })?;

        let mut guard = self.pipes.lock().await;
        let pipes = guard.as_mut().ok_or_else(|| self.not_connected())?;
        self.write_line(&mut pipes.writer, json).await
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.open.swap(false, Ordering::SeqCst) {
            // Best-effort: the server may already be gone.
            let _ = tokio::time::timeout(
                lifecycle::NOTIFY_TIMEOUT,
                self.notify("shutdown", None),
            )
            .await;
        }

        // Servers that read until EOF exit once stdin closes. A request stuck
        // on a hung server keeps the lock; the kill below unblocks it.
        if let Ok(mut pipes) =
            tokio::time::timeout(lifecycle::NOTIFY_TIMEOUT, self.pipes.lock()).await
        {
            pipes.take();
        }

        let child = self.process.lock().await.take();
        if let Some(child) = child {
            lifecycle::terminate(&self.server_name, child).await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().await.clone()
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
