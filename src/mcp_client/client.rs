//! MCP Client: one server's session lifecycle and invocation boundary.
//!
//! Owns at most one live [`Session`], drives the initialize handshake and
//! capability enumeration, and forwards tool/resource/prompt calls. Every
//! session operation is bounded by the server's configured timeout. Failures
//! are logged here and returned as [`McpError`]; nothing panics past this
//! boundary.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use super::errors::McpError;
use super::lifecycle::format_stderr_suffix;
use super::session::{is_method_not_found, Session, SessionFactory};
use super::types::{
    Capabilities, McpPromptDefinition, McpResourceDefinition, McpToolDefinition, ServerConfig,
    ServerIdentity,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Bound on each teardown step during disconnect.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Connection client for a single MCP server.
pub struct McpClient {
    config: ServerConfig,
    factory: Arc<dyn SessionFactory>,
    session: RwLock<Option<Arc<dyn Session>>>,
    capabilities: RwLock<Capabilities>,
    identity: RwLock<Option<ServerIdentity>>,
    connected: AtomicBool,
}

impl McpClient {
    pub fn new(config: ServerConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            config,
            factory,
            session: RwLock::new(None),
            capabilities: RwLock::new(Capabilities::default()),
            identity: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Open the session, run the handshake, and enumerate capabilities.
    ///
    /// Tool listing failure is fatal; resources and prompts are optional.
    /// On any failure the half-open session is closed before returning.
    pub async fn connect(&self) -> Result<(), McpError> {
        self.config.validate()?;

        if self.is_connected().await {
            return Ok(());
        }

        let name = self.name().to_string();
        tracing::debug!(server = %name, transport = ?self.config.transport, "connecting");

        let session: Arc<dyn Session> = self
            .bounded("connect", self.factory.open(&self.config))
            .await
            .map_err(|e| {
                tracing::warn!(server = %name, error = %e, "failed to open session");
                e
            })?
            .into();

        match self.handshake(session.as_ref()).await {
            Ok((identity, caps)) => {
                tracing::info!(
                    server = %name,
                    tools = caps.tools.len(),
                    resources = caps.resources.len(),
                    prompts = caps.prompts.len(),
                    "connected to MCP server"
                );
                *self.identity.write().await = identity;
                *self.capabilities.write().await = caps;
                *self.session.write().await = Some(session);
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                let stderr = session.diagnostics().await;
                if let Err(close_err) = self.bounded("close", session.close()).await {
                    tracing::debug!(server = %name, error = %close_err, "close after failed handshake");
                }
                let keep_as_is = stderr.trim().is_empty()
                    && matches!(e, McpError::Timeout { .. } | McpError::InitFailed { .. });
                let err = if keep_as_is {
                    e
                } else {
                    McpError::InitFailed {
                        name: name.clone(),
                        reason: format!("{e}{}", format_stderr_suffix(&stderr)),
                    }
                };
                tracing::warn!(server = %name, error = %err, "MCP server connection failed");
                Err(err)
            }
        }
    }

    async fn handshake(
        &self,
        session: &dyn Session,
    ) -> Result<(Option<ServerIdentity>, Capabilities), McpError> {
        let init = self.bounded("initialize", session.initialize()).await?;
        let caps = self.enumerate(session).await?;
        Ok((init.server_info, caps))
    }

    /// List tools (required) plus resources and prompts (best-effort).
    async fn enumerate(&self, session: &dyn Session) -> Result<Capabilities, McpError> {
        let tools = self.bounded("tools/list", session.list_tools()).await?;

        let resources = match self.bounded("resources/list", session.list_resources()).await {
            Ok(resources) => resources,
            Err(e) => {
                self.log_optional_failure("resources/list", &e);
                Vec::new()
            }
        };
        let prompts = match self.bounded("prompts/list", session.list_prompts()).await {
            Ok(prompts) => prompts,
            Err(e) => {
                self.log_optional_failure("prompts/list", &e);
                Vec::new()
            }
        };

        Ok(Capabilities {
            tools,
            resources,
            prompts,
        })
    }

    fn log_optional_failure(&self, operation: &str, err: &McpError) {
        if is_method_not_found(err) {
            tracing::debug!(server = %self.name(), operation, "capability not supported");
        } else {
            tracing::debug!(server = %self.name(), operation, error = %err, "optional listing failed");
        }
    }

    /// Close the session and clear all connection state.
    ///
    /// Teardown is best-effort: close failures and timeouts are logged, and
    /// the client always ends up disconnected.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let session = self.session.write().await.take();
        *self.capabilities.write().await = Capabilities::default();
        *self.identity.write().await = None;

        let Some(session) = session else {
            return;
        };

        match tokio::time::timeout(DISCONNECT_TIMEOUT, session.close()).await {
            Ok(Ok(())) => {
                tracing::info!(server = %self.name(), "disconnected from MCP server");
            }
            Ok(Err(e)) => {
                tracing::debug!(server = %self.name(), error = %e, "error while closing session");
            }
            Err(_) => {
                tracing::debug!(
                    server = %self.name(),
                    timeout_ms = DISCONNECT_TIMEOUT.as_millis() as u64,
                    "session close timed out during disconnect"
                );
            }
        }
    }

    // ─── Invocation ──────────────────────────────────────────────────────

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let session = self.live_session().await?;
        let result = self.bounded("tools/call", session.call_tool(name, arguments)).await;
        self.observe("tools/call", result)
    }

    pub async fn get_resource(&self, uri: &str) -> Result<Value, McpError> {
        let session = self.live_session().await?;
        let result = self.bounded("resources/read", session.read_resource(uri)).await;
        self.observe("resources/read", result)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let session = self.live_session().await?;
        let result = self.bounded("prompts/get", session.get_prompt(name, arguments)).await;
        self.observe("prompts/get", result)
    }

    /// Cheap liveness probe: re-list tools. Never errors.
    pub async fn health_check(&self) -> bool {
        let Ok(session) = self.live_session().await else {
            return false;
        };
        match self.bounded("tools/list", session.list_tools()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(server = %self.name(), error = %e, "health check failed");
                false
            }
        }
    }

    /// Re-enumerate capabilities from the live session and store them.
    pub async fn refresh_capabilities(&self) -> Result<Capabilities, McpError> {
        let session = self.live_session().await?;
        let caps = self.enumerate(session.as_ref()).await;
        let caps = self.observe("refresh", caps)?;
        *self.capabilities.write().await = caps.clone();
        Ok(caps)
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    /// Connected flag set and the session still reports its transport open.
    pub async fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }

    pub async fn tools(&self) -> Vec<McpToolDefinition> {
        self.capabilities.read().await.tools.clone()
    }

    pub async fn resources(&self) -> Vec<McpResourceDefinition> {
        self.capabilities.read().await.resources.clone()
    }

    pub async fn prompts(&self) -> Vec<McpPromptDefinition> {
        self.capabilities.read().await.prompts.clone()
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.capabilities.read().await.clone()
    }

    /// Name/version the server reported during initialize.
    pub async fn server_info(&self) -> Option<ServerIdentity> {
        self.identity.read().await.clone()
    }

    // ─── Internals ───────────────────────────────────────────────────────

    async fn live_session(&self) -> Result<Arc<dyn Session>, McpError> {
        let not_connected = || McpError::NotConnected {
            name: self.name().to_string(),
        };
        if !self.connected.load(Ordering::SeqCst) {
            return Err(not_connected());
        }
        self.session.read().await.clone().ok_or_else(not_connected)
    }

    /// Run a session operation under the per-server timeout.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, McpError>
    where
        F: Future<Output = Result<T, McpError>>,
    {
        let timeout = self.config.timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name().to_string(),
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    /// Log a failed operation; a dead transport drops the connected flag.
    fn observe<T>(&self, operation: &str, result: Result<T, McpError>) -> Result<T, McpError> {
        if let Err(e) = &result {
            if e.is_transport_failure() {
                self.connected.store(false, Ordering::SeqCst);
            }
            tracing::warn!(server = %self.name(), operation, error = %e, "MCP operation failed");
        }
        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
