//! In-memory MCP servers for tests.
//!
//! [`FakeSessionFactory`] hands out sessions backed by scripted
//! [`FakeServer`]s instead of spawning processes. Built-in tool behaviour:
//! - `echo` returns `arguments.message`
//! - `add` returns `a + b`
//! - `fail` returns an execution error
//! - `sleep` waits `arguments.ms` milliseconds
//! - anything else returns `{"server": …, "tool": …}`

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp_client::session::{Session, SessionFactory};
use crate::mcp_client::types::{
    error_codes, InitializeResult, McpPromptDefinition, McpResourceDefinition, McpToolDefinition,
    ServerCapabilities, ServerConfig, ServerIdentity, PROTOCOL_VERSION,
};
use crate::mcp_client::McpError;

// ─── Fake Server ─────────────────────────────────────────────────────────────

pub struct FakeServer {
    name: String,
    tools: Mutex<Vec<McpToolDefinition>>,
    resources: Vec<McpResourceDefinition>,
    prompts: Vec<McpPromptDefinition>,
    healthy: AtomicBool,
    reachable: AtomicBool,
    open_delay_ms: AtomicU64,
    calls: AtomicUsize,
    opens: AtomicUsize,
    open_sessions: AtomicUsize,
    generation: AtomicUsize,
}

impl FakeServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Mutex::new(Vec::new()),
            resources: Vec::new(),
            prompts: Vec::new(),
            healthy: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            open_delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            open_sessions: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_tools(self, names: &[&str]) -> Self {
        self.set_tools(names);
        self
    }

    pub fn with_resource(mut self, uri: &str) -> Self {
        self.resources.push(McpResourceDefinition {
            uri: uri.to_string(),
            name: uri.rsplit('/').next().unwrap_or(uri).to_string(),
            description: format!("resource on {}", self.name),
            mime_type: Some("text/plain".into()),
        });
        self
    }

    pub fn with_prompt(mut self, name: &str) -> Self {
        self.prompts.push(McpPromptDefinition {
            name: name.to_string(),
            description: format!("{name} prompt"),
            arguments: Vec::new(),
        });
        self
    }

    pub fn set_tools(&self, names: &[&str]) {
        let tools = names
            .iter()
            .map(|n| McpToolDefinition {
                name: n.to_string(),
                description: format!("{n} tool on {}", self.name),
                input_schema: json!({"type": "object", "properties": {}}),
            })
            .collect();
        if let Ok(mut guard) = self.tools.lock() {
            *guard = tools;
        }
    }

    /// Unhealthy servers fail every list/call with a transport error.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Unreachable servers refuse new sessions.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every later session open wait this long before succeeding.
    pub fn set_open_delay(&self, delay: Duration) {
        self.open_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Break every session opened so far, as if the server restarted.
    /// Sessions opened afterwards work normally.
    pub fn drop_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of `tools/call` requests that reached this server.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of sessions ever opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    fn tool_list(&self) -> Vec<McpToolDefinition> {
        self.tools.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn check_healthy(&self) -> Result<(), McpError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "broken pipe".into(),
            })
        }
    }
}

// ─── Factory ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSessionFactory {
    servers: Mutex<HashMap<String, Arc<FakeServer>>>,
}

impl FakeSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, server: FakeServer) -> Arc<FakeServer> {
        let server = Arc::new(server);
        if let Ok(mut servers) = self.servers.lock() {
            servers.insert(server.name.clone(), server.clone());
        }
        server
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn open(&self, config: &ServerConfig) -> Result<Box<dyn Session>, McpError> {
        let server = self
            .servers
            .lock()
            .ok()
            .and_then(|s| s.get(&config.name).cloned())
            .filter(|s| s.reachable.load(Ordering::SeqCst))
            .ok_or_else(|| McpError::ConnectionFailed {
                name: config.name.clone(),
                reason: "connection refused".into(),
            })?;
        let delay = server.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        server.opens.fetch_add(1, Ordering::SeqCst);
        server.open_sessions.fetch_add(1, Ordering::SeqCst);
        let generation = server.generation.load(Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            server,
            generation,
            open: AtomicBool::new(true),
        }))
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

struct FakeSession {
    server: Arc<FakeServer>,
    generation: usize,
    open: AtomicBool,
}

impl FakeSession {
    fn ensure_open(&self) -> Result<(), McpError> {
        if self.generation != self.server.generation.load(Ordering::SeqCst) {
            return Err(McpError::TransportError {
                server: self.server.name.clone(),
                reason: "connection reset".into(),
            });
        }
        if self.open.load(Ordering::SeqCst) {
            self.server.check_healthy()
        } else {
            Err(McpError::NotConnected {
                name: self.server.name.clone(),
            })
        }
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        self.ensure_open()?;
        Ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Some(ServerIdentity {
                name: self.server.name.clone(),
                version: Some("1.0.0".into()),
            }),
        })
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_open()?;
        Ok(self.server.tool_list())
    }

    async fn list_resources(&self) -> Result<Vec<McpResourceDefinition>, McpError> {
        self.ensure_open()?;
        Ok(self.server.resources.clone())
    }

    async fn list_prompts(&self) -> Result<Vec<McpPromptDefinition>, McpError> {
        self.ensure_open()?;
        if self.server.prompts.is_empty() {
            return Err(McpError::ServerError {
                code: error_codes::METHOD_NOT_FOUND,
                message: "Method not found".into(),
                data: None,
            });
        }
        Ok(self.server.prompts.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.ensure_open()?;
        self.server.calls.fetch_add(1, Ordering::SeqCst);
        match name {
            "echo" => Ok(arguments.get("message").cloned().unwrap_or(Value::Null)),
            "add" => {
                let a = arguments["a"].as_f64().unwrap_or(0.0);
                let b = arguments["b"].as_f64().unwrap_or(0.0);
                Ok(json!(a + b))
            }
            "fail" => Err(McpError::ExecutionFailed {
                tool: name.to_string(),
                server: self.server.name.clone(),
                reason: "tool exploded".into(),
            }),
            "sleep" => {
                let ms = arguments["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({"slept_ms": ms}))
            }
            _ => Ok(json!({"server": self.server.name, "tool": name})),
        }
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.ensure_open()?;
        Ok(json!([{"uri": uri, "text": format!("contents of {uri} from {}", self.server.name)}]))
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.ensure_open()?;
        Ok(json!({
            "description": name,
            "messages": [{"role": "user", "content": {"type": "text", "text": arguments.to_string()}}]
        }))
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.server.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
