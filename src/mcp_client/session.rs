//! MCP sessions.
//!
//! A [`Session`] is the protocol-level contract one server offers: the
//! initialize handshake plus list/call/read/get operations. [`RpcSession`]
//! implements it over any [`Transport`]; [`SessionFactory`] decides which
//! transport a [`ServerConfig`] gets, and is the seam tests use to plug in
//! in-memory servers.

use async_trait::async_trait;
use serde_json::Value;

use super::errors::McpError;
use super::lifecycle;
use super::sse::HttpTransport;
use super::transport::{extract_result, Transport};
use super::types::{
    error_codes, InitializeResult, McpPromptDefinition, McpResourceDefinition, McpToolDefinition,
    ServerConfig, TransportKind, PROTOCOL_VERSION,
};

/// Upper bound on `nextCursor` pages followed by a single list call.
const MAX_LIST_PAGES: usize = 64;

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Protocol operations against one connected server.
#[async_trait]
pub trait Session: Send + Sync {
    async fn initialize(&self) -> Result<InitializeResult, McpError>;

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    async fn list_resources(&self) -> Result<Vec<McpResourceDefinition>, McpError>;

    async fn list_prompts(&self) -> Result<Vec<McpPromptDefinition>, McpError>;

    /// Invoke a tool and return its unwrapped payload.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError>;

    async fn read_resource(&self, uri: &str) -> Result<Value, McpError>;

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), McpError>;

    /// Server-side diagnostic output (stderr for subprocesses), if any.
    async fn diagnostics(&self) -> String {
        String::new()
    }
}

/// Opens sessions for server configs.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, config: &ServerConfig) -> Result<Box<dyn Session>, McpError>;
}

// ─── Default Factory ─────────────────────────────────────────────────────────

/// Opens real transports: a child process for stdio, reqwest for HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionFactory;

#[async_trait]
impl SessionFactory for DefaultSessionFactory {
    async fn open(&self, config: &ServerConfig) -> Result<Box<dyn Session>, McpError> {
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Stdio => Box::new(lifecycle::spawn_stdio(config).await?),
            TransportKind::Http => Box::new(HttpTransport::from_config(config)?),
        };
        Ok(Box::new(RpcSession::new(&config.name, transport)))
    }
}

// ─── JSON-RPC Session ────────────────────────────────────────────────────────

/// [`Session`] implemented as JSON-RPC calls over a [`Transport`].
pub struct RpcSession {
    server_name: String,
    transport: Box<dyn Transport>,
}

impl RpcSession {
    pub fn new(server_name: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            server_name: server_name.to_string(),
            transport,
        }
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let response = self.transport.request(method, params).await?;
        extract_result(response)
    }

    /// Follow `nextCursor` pagination and concatenate `field` arrays.
    async fn list_paged<T>(&self, method: &str, field: &str) -> Result<Vec<T>, McpError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let mut result = self.call(method, params).await?;

            let page = result
                .get_mut(field)
                .map(Value::take)
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let mut parsed: Vec<T> =
                serde_json::from_value(page).map_err(|e| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("malformed {method} response: {e}"),
                })?;
            items.append(&mut parsed);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        tracing::warn!(
            server = %self.server_name,
            method,
            pages = MAX_LIST_PAGES,
            "stopped following pagination cursor"
        );
        Ok(items)
    }
}

#[async_trait]
impl Session for RpcSession {
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self.call("initialize", Some(params)).await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: self.server_name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        tracing::debug!(
            server = %self.server_name,
            protocol = %init.protocol_version,
            "initialize handshake complete"
        );
        Ok(init)
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.list_paged("tools/list", "tools").await
    }

    async fn list_resources(&self) -> Result<Vec<McpResourceDefinition>, McpError> {
        self.list_paged("resources/list", "resources").await
    }

    async fn list_prompts(&self) -> Result<Vec<McpPromptDefinition>, McpError> {
        self.list_paged("prompts/list", "prompts").await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = self.call("tools/call", Some(params)).await?;
        unwrap_tool_result(name, &self.server_name, result)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        let mut result = self
            .call("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await?;
        Ok(match result.get_mut("contents") {
            Some(contents) => contents.take(),
            None => result,
        })
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.call("prompts/get", Some(params)).await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    async fn close(&self) -> Result<(), McpError> {
        self.transport.close().await
    }

    async fn diagnostics(&self) -> String {
        self.transport.stderr_tail().await
    }
}

// ─── Result Unwrapping ───────────────────────────────────────────────────────

/// Reduce a `tools/call` result to its payload.
///
/// Preference order: `structuredContent`, then a lone text block (parsed as
/// JSON when it is JSON), then the raw content array. `isError` results
/// become [`McpError::ExecutionFailed`].
pub fn unwrap_tool_result(tool: &str, server: &str, result: Value) -> Result<Value, McpError> {
    let content = result.get("content").and_then(Value::as_array);

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let reason = content
            .map(|blocks| collect_text(blocks))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "tool reported an error".to_string());
        return Err(McpError::ExecutionFailed {
            tool: tool.to_string(),
            server: server.to_string(),
            reason,
        });
    }

    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        return Ok(structured.clone());
    }

    match content {
        Some(blocks) if blocks.len() == 1 && blocks[0]["type"] == "text" => {
            let text = blocks[0]["text"].as_str().unwrap_or_default();
            Ok(serde_json::from_str::<Value>(text)
                .unwrap_or_else(|_| Value::String(text.to_string())))
        }
        Some(blocks) => Ok(Value::Array(blocks.clone())),
        None => Ok(result),
    }
}

fn collect_text(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether an error means the server simply lacks an optional capability.
pub fn is_method_not_found(err: &McpError) -> bool {
    matches!(err, McpError::ServerError { code, .. } if *code == error_codes::METHOD_NOT_FOUND)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_prefers_structured_content() {
        let result = json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"sum": 5}
        });
        assert_eq!(unwrap_tool_result("add", "s", result).unwrap(), json!({"sum": 5}));
    }

    #[test]
    fn test_unwrap_single_text_block_parses_json() {
        let result = json!({"content": [{"type": "text", "text": "{\"n\": 3}"}]});
        assert_eq!(unwrap_tool_result("t", "s", result).unwrap(), json!({"n": 3}));
    }

    #[test]
    fn test_unwrap_single_text_block_plain_string() {
        let result = json!({"content": [{"type": "text", "text": "hi"}]});
        assert_eq!(unwrap_tool_result("echo", "s", result).unwrap(), json!("hi"));
    }

    #[test]
    fn test_unwrap_multiple_blocks_returns_array() {
        let result = json!({"content": [
            {"type": "text", "text": "a"},
            {"type": "image", "data": "...", "mimeType": "image/png"}
        ]});
        let value = unwrap_tool_result("t", "s", result).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unwrap_is_error_becomes_execution_failed() {
        let result = json!({
            "isError": true,
            "content": [{"type": "text", "text": "division by zero"}]
        });
        match unwrap_tool_result("div", "calc", result).unwrap_err() {
            McpError::ExecutionFailed { tool, server, reason } => {
                assert_eq!(tool, "div");
                assert_eq!(server, "calc");
                assert_eq!(reason, "division by zero");
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_method_not_found_detection() {
        let err = McpError::ServerError {
            code: error_codes::METHOD_NOT_FOUND,
            message: "no prompts".into(),
            data: None,
        };
        assert!(is_method_not_found(&err));
        assert!(!is_method_not_found(&McpError::NotConnected { name: "x".into() }));
    }

    /// A shell script that speaks just enough MCP for the handshake and one
    /// paginated `tools/list`.
    #[cfg(unix)]
    const SCRIPTED_SERVER: &str = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh-mcp","version":"0.1"}}}'
read initialized
read list1
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo"}],"nextCursor":"p2"}}'
read list2
echo '{"jsonrpc":"2.0","id":3,"result":{"tools":[{"name":"add","description":"Add numbers"}]}}'
read call
echo '{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"hi"}]}}'
sleep 5
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rpc_session_over_stdio() {
        let config = ServerConfig::stdio("sh-mcp", "sh", &["-c", SCRIPTED_SERVER]);
        let session = DefaultSessionFactory.open(&config).await.unwrap();

        let init = session.initialize().await.unwrap();
        assert_eq!(init.server_info.unwrap().name, "sh-mcp");

        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "add"]);

        let echoed = session
            .call_tool("echo", json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(echoed, json!("hi"));

        session.close().await.unwrap();
        assert!(!session.is_connected());
    }
}
