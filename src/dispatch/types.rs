//! Dispatch request/result records, settings, and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::strategy::SelectionStrategy;
use crate::discovery::CapabilitySummary;
use crate::mcp_client::{ErrorKind, McpError};

// ─── Requests & Results ──────────────────────────────────────────────────────

/// One entry of a batch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Outcome of one dispatched tool call. Failures are values, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionResult {
    pub tool_name: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Server that served (or was selected to serve) the call.
    pub server_name: Option<String>,
    pub execution_time_ms: u64,
    /// Served from the result cache without contacting the server.
    pub cached: bool,
}

impl ToolExecutionResult {
    pub fn succeeded(tool: &str, server: &str, result: Value, execution_time_ms: u64) -> Self {
        Self {
            tool_name: tool.to_string(),
            success: true,
            result: Some(result),
            error_message: None,
            error_kind: None,
            server_name: Some(server.to_string()),
            execution_time_ms,
            cached: false,
        }
    }

    pub fn failed(
        tool: &str,
        server: Option<&str>,
        error: &McpError,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            tool_name: tool.to_string(),
            success: false,
            result: None,
            error_message: Some(error.to_string()),
            error_kind: Some(error.kind()),
            server_name: server.map(str::to_string),
            execution_time_ms,
            cached: false,
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Dispatch tuning, read from the `dispatch` config section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    #[serde(default)]
    pub strategy: SelectionStrategy,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_max_cache_entries() -> usize {
    1000
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            max_cache_entries: default_max_cache_entries(),
            strategy: SelectionStrategy::default(),
        }
    }
}

impl DispatchSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

// ─── Statistics ──────────────────────────────────────────────────────────────

/// Running dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub filtered: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Result-cache occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Read-only snapshot returned by `get_registry_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedRegistryStats {
    pub capabilities: CapabilitySummary,
    pub dispatch: DispatchStats,
    pub cache: CacheStats,
    pub strategy: SelectionStrategy,
    pub filters: usize,
}
