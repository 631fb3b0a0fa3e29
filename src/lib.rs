//! mcp-hub: a multi-server MCP client.
//!
//! Layers, bottom-up:
//! - [`mcp_client`]: one connection to one server (stdio or HTTP/SSE)
//! - [`registry`]: many named servers, their state machine, retry, health loop
//! - [`discovery`]: the unified tool/resource/prompt catalog
//! - [`dispatch`]: invoke-by-name with strategy selection, caching, filters
//! - [`hub`]: wires the layers from a [`config::HubConfig`]

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod hub;
pub mod mcp_client;
pub mod registry;
pub mod task;

#[cfg(test)]
mod testing;

use std::path::Path;

pub use config::{find_config_path, load_config, HubConfig};
pub use discovery::{DiscoveryEngine, DiscoveryResult, ToolInfo};
pub use dispatch::{SelectionStrategy, ToolExecutionResult, ToolRequest, UnifiedToolRegistry};
pub use hub::McpHub;
pub use mcp_client::{McpClient, McpError, ServerConfig, TransportKind};
pub use registry::{ServerInfo, ServerRegistry, ServerStatus};

/// Rotated log files kept next to the active one.
const LOG_KEEP: u32 = 3;

/// Install the global tracing subscriber.
///
/// Filter comes from `RUST_LOG` (default `mcp_hub=info,warn`). With a log
/// file, older logs are rotated (`.1`..`.3`) and every line is flushed as it
/// is written; otherwise output goes to stderr. `MCP_HUB_LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing(log_file: Option<&Path>) -> std::io::Result<()> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcp_hub=info,warn"));

    let (writer, ansi) = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            rotate_log_file(path, LOG_KEEP);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            (BoxMakeWriter::new(FlushingWriter::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let json = std::env::var("MCP_HUB_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.with_ansi(ansi).try_init()
    };
    installed.map_err(|e| std::io::Error::other(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_file.map(|p| p.display().to_string()),
        pid = std::process::id(),
        "mcp-hub logging initialised"
    );
    Ok(())
}

/// Rotate `hub.log` → `hub.log.1` → … → `hub.log.{keep}`; the oldest is dropped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// File writer that flushes after every write so lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
