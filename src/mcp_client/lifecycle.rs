//! Server process lifecycle management.
//!
//! Spawns stdio MCP servers as child processes, drains their stderr into a
//! bounded tail for diagnostics, and terminates them on close.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::StdioTransport;
use super::types::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful exit before force-killing.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for the best-effort shutdown notification.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum stderr bytes retained per server.
const STDERR_TAIL_BYTES: usize = 2000;

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a stdio server process and wrap its pipes in a transport.
///
/// No protocol traffic happens here; the handshake belongs to the session.
pub async fn spawn_stdio(config: &ServerConfig) -> Result<StdioTransport, McpError> {
    let name = config.name.as_str();
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(dir) = config.cwd.as_deref() {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let stderr_tail = Arc::new(Mutex::new(String::new()));
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(name.to_string(), stderr, stderr_tail.clone()));
    }

    tracing::debug!(
        server = name,
        command = %config.command,
        pid = ?child.id(),
        "spawned MCP server process"
    );

    Ok(StdioTransport::new(name, child, stdin, stdout).with_stderr_tail(stderr_tail))
}

/// Forward server stderr to the log and keep the most recent bytes.
///
/// Also keeps the pipe from filling up and stalling a chatty server.
async fn drain_stderr(server: String, stderr: ChildStderr, tail: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server, stderr = %line, "server stderr");
        let mut buf = tail.lock().await;
        buf.push_str(&line);
        buf.push('\n');
        if buf.len() > STDERR_TAIL_BYTES {
            let mut cut = buf.len() - STDERR_TAIL_BYTES;
            while !buf.is_char_boundary(cut) {
                cut += 1;
            }
            buf.drain(..cut);
        }
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub fn format_stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {trimmed}")
    }
}

// ─── Shutdown ────────────────────────────────────────────────────────────────

/// Wait briefly for the process to exit, then force-kill it.
pub async fn terminate(server: &str, mut child: Child) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(server, %status, "server process exited");
        }
        _ => {
            if let Err(e) = child.kill().await {
                tracing::debug!(server, error = %e, "kill failed (process already gone?)");
            } else {
                tracing::debug!(server, "server process killed after shutdown timeout");
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::transport::Transport;

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("  \n"), "");
        assert_eq!(
            format_stderr_suffix("ImportError: no module\n"),
            " | stderr: ImportError: no module"
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = ServerConfig::stdio("ghost", "/nonexistent/mcp-server-binary", &[]);
        let err = spawn_stdio(&config).await.err().unwrap();
        assert!(matches!(err, McpError::SpawnFailed { ref name, .. } if name == "ghost"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_tail_is_captured() {
        let config = ServerConfig::stdio("noisy", "sh", &["-c", "echo boom >&2; sleep 5"]);
        let transport = spawn_stdio(&config).await.unwrap();

        let mut tail = String::new();
        for _ in 0..50 {
            tail = transport.stderr_tail().await;
            if !tail.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(tail.contains("boom"));
        transport.close().await.unwrap();
    }
}
