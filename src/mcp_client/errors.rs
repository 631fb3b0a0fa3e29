//! MCP hub error types.
//!
//! A single error enum is shared by the connection, registry, discovery, and
//! dispatch layers. Public operations return it inside `Result`; aggregate
//! operations (batch dispatch, discovery) fold it into structured failure
//! records instead.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur anywhere in the MCP hub.
#[derive(Debug, Error)]
pub enum McpError {
    /// Invalid server configuration (missing command/URL, bad transport).
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// Transport could not be opened.
    #[error("connection to server '{name}' failed: {reason}")]
    ConnectionFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Operation attempted on a client with no live session.
    #[error("server '{name}' is not connected")]
    NotConnected { name: String },

    /// No connected server hosts the requested capability.
    #[error("no available servers for tool '{name}'{}", format_suggestions(.suggestions))]
    ToolNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    /// The hosting server is known but not currently healthy.
    #[error("server '{name}' is unavailable")]
    ServerUnavailable { name: String },

    /// A registered filter rejected the call.
    #[error("tool call '{tool}' rejected by filter")]
    Filtered { tool: String },

    /// The remote call itself failed.
    #[error("execution of '{tool}' on server '{server}' failed: {reason}")]
    ExecutionFailed {
        tool: String,
        server: String,
        reason: String,
    },

    /// An awaited operation exceeded its bound.
    #[error("{operation} on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },
}

/// Coarse classification of an [`McpError`], carried on execution results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connection,
    NotConnected,
    ToolNotFound,
    ServerUnavailable,
    Filtered,
    Execution,
    Timeout,
}

impl McpError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::ConfigError { .. } => ErrorKind::Configuration,
            McpError::SpawnFailed { .. }
            | McpError::ConnectionFailed { .. }
            | McpError::InitFailed { .. }
            | McpError::TransportError { .. } => ErrorKind::Connection,
            McpError::NotConnected { .. } => ErrorKind::NotConnected,
            McpError::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            McpError::ServerUnavailable { .. } => ErrorKind::ServerUnavailable,
            McpError::Filtered { .. } => ErrorKind::Filtered,
            McpError::ServerError { .. } | McpError::ExecutionFailed { .. } => {
                ErrorKind::Execution
            }
            McpError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether this error means the underlying transport is gone.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            McpError::TransportError { .. } | McpError::NotConnected { .. }
        )
    }
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_message_without_suggestions() {
        let err = McpError::ToolNotFound {
            name: "ech".into(),
            suggestions: vec![],
        };
        assert_eq!(err.to_string(), "no available servers for tool 'ech'");
    }

    #[test]
    fn test_tool_not_found_message_with_suggestions() {
        let err = McpError::ToolNotFound {
            name: "ech".into(),
            suggestions: vec!["echo".into(), "each".into()],
        };
        assert_eq!(
            err.to_string(),
            "no available servers for tool 'ech' (did you mean: echo, each?)"
        );
    }

    #[test]
    fn test_kind_classification() {
        let timeout = McpError::Timeout {
            server: "s".into(),
            operation: "tools/call".into(),
            timeout_ms: 10,
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let spawn = McpError::SpawnFailed {
            name: "s".into(),
            reason: "no such file".into(),
        };
        assert_eq!(spawn.kind(), ErrorKind::Connection);

        let rpc = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(rpc.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_transport_failure_detection() {
        assert!(McpError::NotConnected { name: "a".into() }.is_transport_failure());
        assert!(!McpError::Filtered { tool: "t".into() }.is_transport_failure());
    }
}
