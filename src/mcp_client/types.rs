//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, and the per-server
//! connection descriptor.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::McpError;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `id` is optional so that notifications interleaved on the same stream
/// still parse and can be skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Protocol revision sent in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tool definition from `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Resource definition from `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResourceDefinition {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// A declared prompt argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Prompt definition from `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPromptDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<McpPromptArgument>,
}

/// Capabilities advertised in the `initialize` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub resources: Option<serde_json::Value>,
    #[serde(default)]
    pub prompts: Option<serde_json::Value>,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerIdentity>,
}

/// Server identity returned in the initialize response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Snapshot of everything a server exposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    pub tools: Vec<McpToolDefinition>,
    pub resources: Vec<McpResourceDefinition>,
    pub prompts: Vec<McpPromptDefinition>,
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// How the hub reaches a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Spawned subprocess speaking line-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// Remote endpoint: JSON-RPC over HTTP POST, replies as JSON or SSE.
    #[serde(alias = "sse", alias = "streamable_http")]
    Http,
}

/// Immutable description of one backend server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name (e.g., "filesystem").
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Executable for stdio servers.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the spawned process.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Endpoint for HTTP servers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Bound on every session operation.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Automatic reconnection gives up after this many consecutive failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Minimum spacing between automatic reconnection attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}

impl ServerConfig {
    /// A stdio server config with default tuning.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
            enabled: true,
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }

    /// An HTTP server config with default tuning.
    pub fn http(name: &str, url: &str) -> Self {
        Self {
            transport: TransportKind::Http,
            command: String::new(),
            args: Vec::new(),
            url: Some(url.to_string()),
            ..Self::stdio(name, "", &[])
        }
    }

    /// Check the transport-specific required fields.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.name.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: "server name must not be empty".into(),
            });
        }
        match self.transport {
            TransportKind::Stdio if self.command.trim().is_empty() => Err(McpError::ConfigError {
                reason: format!("stdio server '{}' has no command", self.name),
            }),
            TransportKind::Http
                if self.url.as_deref().map(str::trim).unwrap_or("").is_empty() =>
            {
                Err(McpError::ConfigError {
                    reason: format!("http server '{}' has no url", self.name),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_omits_missing_params() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_notification_parses_without_id() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.id.is_none());
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_tool_definition_defaults_schema() {
        let tool: McpToolDefinition = serde_json::from_str(r#"{"name":"echo"}"#).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_server_config_defaults_from_yaml() {
        let yaml = r#"
            name: files
            command: npx
            args: ["tsx", "src/index.ts"]
        "#;
        let cfg: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.transport, TransportKind::Stdio);
        assert!(cfg.enabled);
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_sse_alias_maps_to_http() {
        let cfg: ServerConfig =
            serde_yaml::from_str("name: remote\ntransport: sse\nurl: http://localhost:9000/mcp")
                .unwrap();
        assert_eq!(cfg.transport, TransportKind::Http);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let parsed: Result<ServerConfig, _> =
            serde_yaml::from_str("name: odd\ntransport: carrier_pigeon\ncommand: x");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_stdio_requires_command() {
        let cfg = ServerConfig::stdio("files", "  ", &[]);
        assert!(matches!(cfg.validate(), Err(McpError::ConfigError { .. })));
    }

    #[test]
    fn test_validate_http_requires_url() {
        let mut cfg = ServerConfig::http("remote", "http://localhost:1");
        cfg.url = None;
        assert!(matches!(cfg.validate(), Err(McpError::ConfigError { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let cfg = ServerConfig::stdio("", "npx", &[]);
        assert!(cfg.validate().is_err());
    }
}
