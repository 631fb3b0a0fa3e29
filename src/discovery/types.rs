//! Catalog records produced by discovery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mcp_client::{McpPromptDefinition, McpResourceDefinition, McpToolDefinition};

/// Whether a catalogued capability is believed callable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Unavailable,
    #[default]
    Unknown,
}

/// One tool hosted by one server.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    /// Tool name as the server knows it.
    pub name: String,
    /// Name this entry is callable under: the bare name for the first host,
    /// `<server>.<tool>` for later hosts of the same name.
    pub catalog_name: String,
    pub server_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub availability_status: AvailabilityStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
}

impl ToolInfo {
    pub fn from_definition(server: &str, def: &McpToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            catalog_name: def.name.clone(),
            server_name: server.to_string(),
            description: def.description.clone(),
            input_schema: def.input_schema.clone(),
            availability_status: AvailabilityStatus::Available,
            last_checked: Some(Utc::now()),
            usage_count: 0,
            last_used: None,
            response_time_ms: None,
        }
    }

    /// Whether this entry is the qualified alias of a conflicting name.
    pub fn is_qualified(&self) -> bool {
        self.catalog_name != self.name
    }
}

/// One resource hosted by one server.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    pub server_name: String,
    pub description: String,
    pub mime_type: Option<String>,
    pub availability_status: AvailabilityStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl ResourceInfo {
    pub fn from_definition(server: &str, def: &McpResourceDefinition) -> Self {
        Self {
            uri: def.uri.clone(),
            name: def.name.clone(),
            server_name: server.to_string(),
            description: def.description.clone(),
            mime_type: def.mime_type.clone(),
            availability_status: AvailabilityStatus::Available,
            last_checked: Some(Utc::now()),
        }
    }
}

/// One prompt hosted by one server.
#[derive(Debug, Clone, Serialize)]
pub struct PromptInfo {
    pub name: String,
    pub catalog_name: String,
    pub server_name: String,
    pub description: String,
    pub arguments: Vec<String>,
    pub availability_status: AvailabilityStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl PromptInfo {
    pub fn from_definition(server: &str, def: &McpPromptDefinition) -> Self {
        Self {
            name: def.name.clone(),
            catalog_name: def.name.clone(),
            server_name: server.to_string(),
            description: def.description.clone(),
            arguments: def.arguments.iter().map(|a| a.name.clone()).collect(),
            availability_status: AvailabilityStatus::Available,
            last_checked: Some(Utc::now()),
        }
    }
}

/// Outcome of discovering one server.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub server_name: String,
    pub success: bool,
    pub tools: Vec<McpToolDefinition>,
    pub resources: Vec<McpResourceDefinition>,
    pub prompts: Vec<McpPromptDefinition>,
    pub error_message: Option<String>,
    pub discovered_at: DateTime<Utc>,
    /// Served from the per-server cache rather than a live query.
    pub from_cache: bool,
}

impl DiscoveryResult {
    pub fn failed(server: &str, error: impl Into<String>) -> Self {
        Self {
            server_name: server.to_string(),
            success: false,
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            error_message: Some(error.into()),
            discovered_at: Utc::now(),
            from_cache: false,
        }
    }
}

/// A tool name exposed by more than one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolConflict {
    pub tool_name: String,
    /// Server that owns the bare name.
    pub primary_server: String,
    /// Later server, reachable under `qualified_name`.
    pub server: String,
    pub qualified_name: String,
}

/// Aggregate catalog counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapabilitySummary {
    /// Tool entries across all servers, qualified aliases included.
    pub total_tools: usize,
    pub unique_tool_names: usize,
    pub total_resources: usize,
    pub total_prompts: usize,
    pub servers_discovered: usize,
    pub tools_by_server: BTreeMap<String, Vec<String>>,
    pub conflicts: Vec<ToolConflict>,
    pub total_tool_calls: u64,
    pub last_discovery: Option<DateTime<Utc>>,
}

/// Where a call for a catalog name should go.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallTarget {
    pub server_name: String,
    /// Name the server knows the capability by.
    pub name: String,
}
