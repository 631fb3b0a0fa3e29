//! Registry-side server state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mcp_client::ServerConfig;

/// Connection state of a registered server.
///
/// `Disabled → Disconnected → Connecting → Connected`, with
/// `Connected → Disconnected` on manual disconnect and
/// `Connected → Error → Connecting` on failure and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerStatus::Disabled => "disabled",
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::Connecting => "connecting",
            ServerStatus::Connected => "connected",
            ServerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of one registered server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub config: ServerConfig,
    pub status: ServerStatus,
    /// Consecutive failed connection attempts since the last success.
    pub connection_attempts: u32,
    pub last_connection_attempt: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tool_count: usize,
    pub resource_count: usize,
    pub prompt_count: usize,
}

impl ServerInfo {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Aggregate registry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_servers: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub disabled: usize,
    pub error: usize,
    pub total_tools: usize,
    pub health_monitoring: bool,
}
