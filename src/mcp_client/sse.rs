//! JSON-RPC over HTTP with server-sent-event replies.
//!
//! Every request is a POST of one JSON-RPC envelope. The server answers with
//! either a plain JSON body or a `text/event-stream` whose `data:` events carry
//! JSON-RPC messages; the one whose `id` matches ours is the response. A
//! `mcp-session-id` header handed out by the server is echoed on later calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::Transport;
use super::types::{JsonRpcRequest, JsonRpcResponse, ServerConfig};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the server-assigned session id.
const SESSION_HEADER: &str = "mcp-session-id";

// ─── SSE Event Parser ────────────────────────────────────────────────────────

/// Incremental splitter for `text/event-stream` bodies.
///
/// Bytes arrive in arbitrary chunks; complete events end at a blank line.
/// Only `data:` lines matter here; comments and `event:`/`id:` fields are
/// dropped.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: String,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data payloads of every completed event.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));

        let mut payloads = Vec::new();
        while let Some(event_end) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..event_end + 2).collect();
            if let Some(data) = event_data(&event) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_data(rest.trim())
    }
}

/// Join the `data:` lines of one event. `None` for keep-alives and comments.
fn event_data(event: &str) -> Option<String> {
    let mut data = Vec::new();
    for line in event.lines() {
        if let Some(value) = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))
        {
            data.push(value);
        }
    }
    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}

fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case("text/event-stream"))
        .unwrap_or(false)
}

// ─── HTTP Transport ──────────────────────────────────────────────────────────

/// JSON-RPC transport to a remote HTTP endpoint.
pub struct HttpTransport {
    server_name: String,
    url: String,
    http: HttpClient,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    open: AtomicBool,
}

impl HttpTransport {
    /// Build a transport from a server config. Performs no network I/O.
    pub fn from_config(config: &ServerConfig) -> Result<Self, McpError> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| McpError::ConfigError {
                reason: format!("http server '{}' has no url", config.name),
            })?;

        let headers = build_headers(&config.headers).map_err(|reason| McpError::ConfigError {
            reason: format!("server '{}': {reason}", config.name),
        })?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| McpError::ConnectionFailed {
                name: config.name.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            server_name: config.name.clone(),
            url,
            http,
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
            open: AtomicBool::new(true),
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// POST one envelope, attaching the session header when we have one.
    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, McpError> {
        let mut req = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            req = req.header(SESSION_HEADER, session);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_connect() {
                self.open.store(false, Ordering::SeqCst);
            }
            self.transport_error(format!("request failed: {e}"))
        })?;

        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND {
                // Session expired server-side.
                *self.session_id.lock().await = None;
            }
            return Err(self.transport_error(format!("HTTP {status}: {text}")));
        }
        Ok(resp)
    }

    /// Read an event stream until the response with `id` shows up.
    async fn read_event_stream(
        &self,
        resp: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut bytes = resp.bytes_stream();
        let mut parser = SseEventParser::new();

        while let Some(chunk) = bytes.next().await {
            let chunk =
                chunk.map_err(|e| self.transport_error(format!("stream read error: {e}")))?;
            for payload in parser.push(&String::from_utf8_lossy(&chunk)) {
                if let Some(resp) = match_response(&payload, id) {
                    return Ok(resp);
                }
            }
        }

        parser
            .finish()
            .and_then(|payload| match_response(&payload, id))
            .ok_or_else(|| self.transport_error(format!("event stream ended without response {id}")))
    }
}

fn match_response(payload: &str, id: u64) -> Option<JsonRpcResponse> {
    serde_json::from_str::<JsonRpcResponse>(payload)
        .ok()
        .filter(|resp| resp.id == Some(id))
}

fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| format!("invalid header name '{key}': {e}"))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for header '{key}': {e}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for HttpTransport {
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
        let body = serde_json::to_value(JsonRpcRequest::new(id, method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        let resp = self.post(&body).await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if is_event_stream(&content_type) {
            self.read_event_stream(resp, id).await
        } else {
            resp.json::<JsonRpcResponse>()
                .await
                .map_err(|e| self.transport_error(format!("invalid JSON-RPC body: {e}")))
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or_else(|| serde_json::json!({})),
        });
        self.post(&body).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), McpError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let session = self.session_id.lock().await.take();
        if let Some(session) = session {
            // Best-effort session termination; servers may not support DELETE.
            let result = self
                .http
                .delete(&self.url)
                .header(SESSION_HEADER, session)
                .timeout(super::lifecycle::NOTIFY_TIMEOUT)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(server = %self.server_name, error = %e, "session DELETE failed");
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
