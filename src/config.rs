//! Hub configuration loading.
//!
//! Reads `mcp-hub.yaml` (JSON is accepted too) and resolves `${VAR}` /
//! `${VAR:-default}` references before parsing. Relative server `cwd` values
//! are resolved against the config file's directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::discovery::DiscoverySettings;
use crate::dispatch::DispatchSettings;
use crate::mcp_client::{McpError, ServerConfig};

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "mcp-hub.yaml";

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MCP_HUB_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Health-check period for the whole registry. When absent, the shortest
    /// per-server `health_check_interval_ms` is used; 0 disables monitoring.
    #[serde(default)]
    pub health_check_interval_secs: Option<u64>,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Optional allowlist of server names to register. All others are skipped.
    #[serde(default)]
    pub enabled_servers: Option<Vec<String>>,
}

impl HubConfig {
    pub fn health_check_interval(&self) -> Option<Duration> {
        match self.health_check_interval_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self
                .servers
                .iter()
                .filter(|s| s.enabled)
                .map(ServerConfig::health_check_interval)
                .filter(|d| !d.is_zero())
                .min(),
        }
    }

    /// Servers that pass the `enabled_servers` allowlist, in file order.
    pub fn active_servers(&self) -> Vec<ServerConfig> {
        match &self.enabled_servers {
            Some(allow) if !allow.is_empty() => self
                .servers
                .iter()
                .filter(|s| allow.iter().any(|name| name == &s.name))
                .cloned()
                .collect(),
            _ => self.servers.clone(),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: `MCP_HUB_CONFIG`, then `mcp-hub.yaml` searched upward from `start`,
/// then `<platform config dir>/mcp-hub/mcp-hub.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, McpError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("mcp-hub").join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(McpError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load, interpolate, and parse a config file. Every server is validated.
pub fn load_config(path: &Path) -> Result<HubConfig, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let mut config = parse_config(&raw)?;
    if let Some(base) = path.parent() {
        resolve_relative_cwds(&mut config, base);
    }

    tracing::info!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded hub config"
    );
    Ok(config)
}

/// Parse config text after env-var interpolation.
pub fn parse_config(raw: &str) -> Result<HubConfig, McpError> {
    let interpolated = interpolate_env_vars(raw);
    let config: HubConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    for server in &config.servers {
        server.validate()?;
    }
    Ok(config)
}

fn resolve_relative_cwds(config: &mut HubConfig, base: &Path) {
    for server in &mut config.servers {
        if let Some(cwd) = &server.cwd {
            let expanded = expand_tilde(cwd);
            let path = Path::new(&expanded);
            server.cwd = Some(if path.is_absolute() {
                expanded.clone()
            } else {
                base.join(path).to_string_lossy().into_owned()
            });
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                expr.push(c);
            }
            result.push_str(&resolve_var_expr(&expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
