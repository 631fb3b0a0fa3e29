//! Server registry: every configured server and its connection state.
//!
//! Servers are kept in registration order. Each one carries a transition
//! mutex so connect and disconnect of the same server never overlap; distinct
//! servers connect and disconnect concurrently. Automatic reconnection only
//! happens from the health-check cycle, gated by [`ServerRegistry::should_retry_connection`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};

use super::types::{RegistryStats, ServerInfo, ServerStatus};
use crate::mcp_client::{DefaultSessionFactory, McpClient, McpError, ServerConfig, SessionFactory};
use crate::task::PeriodicTask;

// ─── Per-server State ────────────────────────────────────────────────────────

struct ServerEntry {
    name: String,
    /// Serializes connect/disconnect transitions for this server.
    transition: Mutex<()>,
    state: Mutex<ServerState>,
}

struct ServerState {
    config: ServerConfig,
    status: ServerStatus,
    connection_attempts: u32,
    last_connection_attempt: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Set when a failed health probe dropped the connection; later health
    /// ticks keep retrying until the retry gate lets one through.
    reconnect_pending: bool,
    client: Option<Arc<McpClient>>,
    tool_count: usize,
    resource_count: usize,
    prompt_count: usize,
}

impl ServerEntry {
    fn new(config: ServerConfig) -> Self {
        let status = if config.enabled {
            ServerStatus::Disconnected
        } else {
            ServerStatus::Disabled
        };
        Self {
            name: config.name.clone(),
            transition: Mutex::new(()),
            state: Mutex::new(ServerState {
                config,
                status,
                connection_attempts: 0,
                last_connection_attempt: None,
                connected_at: None,
                last_health_check: None,
                last_error: None,
                reconnect_pending: false,
                client: None,
                tool_count: 0,
                resource_count: 0,
                prompt_count: 0,
            }),
        }
    }
}

impl ServerState {
    fn snapshot(&self) -> ServerInfo {
        ServerInfo {
            config: self.config.clone(),
            status: self.status,
            connection_attempts: self.connection_attempts,
            last_connection_attempt: self.last_connection_attempt,
            connected_at: self.connected_at,
            last_health_check: self.last_health_check,
            last_error: self.last_error.clone(),
            tool_count: self.tool_count,
            resource_count: self.resource_count,
            prompt_count: self.prompt_count,
        }
    }

    fn clear_connection(&mut self) {
        self.client = None;
        self.connected_at = None;
        self.tool_count = 0;
        self.resource_count = 0;
        self.prompt_count = 0;
    }

    fn idle_status(&self) -> ServerStatus {
        if self.config.enabled {
            ServerStatus::Disconnected
        } else {
            ServerStatus::Disabled
        }
    }

    /// Automatic reconnection gate: enabled, under the attempt limit, and
    /// not attempted within the last `retry_delay`.
    fn retry_eligible(&self, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.connection_attempts >= self.config.retry_attempts {
            return false;
        }
        match self.last_connection_attempt {
            None => true,
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .map(|elapsed| elapsed >= self.config.retry_delay())
                .unwrap_or(false),
        }
    }
}

/// Resets an entry left in `Connecting` when a connect future is dropped
/// before it finishes (e.g. a health tick cancelled by shutdown).
struct ConnectingGuard<'a> {
    entry: &'a ServerEntry,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // The state lock is never held across the connect await. If it is
        // busy anyway, `disconnect_all` also resets `Connecting` entries.
        if let Ok(mut state) = self.entry.state.try_lock() {
            if state.status == ServerStatus::Connecting {
                state.clear_connection();
                state.status = state.idle_status();
                tracing::debug!(server = %self.entry.name, "connection attempt cancelled");
            }
        }
    }
}

// ─── ServerRegistry ──────────────────────────────────────────────────────────

/// Owns all registered servers and drives their connection state machine.
pub struct ServerRegistry {
    factory: Arc<dyn SessionFactory>,
    servers: RwLock<Vec<Arc<ServerEntry>>>,
    monitor: Mutex<Option<PeriodicTask>>,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new(Arc::new(DefaultSessionFactory))
    }
}

impl ServerRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            servers: RwLock::new(Vec::new()),
            monitor: Mutex::new(None),
        }
    }

    // ─── Registration ────────────────────────────────────────────────────

    /// Validate and store a server, connecting immediately when enabled.
    ///
    /// Only configuration problems are errors; a failed initial connection
    /// still registers the server (in `Error`) and returns its status.
    pub async fn register_server(&self, config: ServerConfig) -> Result<ServerStatus, McpError> {
        if let Err(e) = config.validate() {
            tracing::warn!(server = %config.name, error = %e, "rejected server config");
            return Err(e);
        }

        let entry = {
            let mut servers = self.servers.write().await;
            if servers.iter().any(|e| e.name == config.name) {
                return Err(McpError::ConfigError {
                    reason: format!("server '{}' is already registered", config.name),
                });
            }
            let entry = Arc::new(ServerEntry::new(config));
            servers.push(entry.clone());
            entry
        };

        let enabled = entry.state.lock().await.config.enabled;
        if !enabled {
            tracing::info!(server = %entry.name, "registered disabled server");
            return Ok(ServerStatus::Disabled);
        }

        tracing::info!(server = %entry.name, "registered server");
        // Failure is recorded on the entry.
        let _ = self.connect_entry(&entry).await;
        let status = entry.state.lock().await.status;
        Ok(status)
    }

    /// Disconnect and forget a server. `false` if the name is unknown.
    pub async fn unregister_server(&self, name: &str) -> bool {
        let Some(entry) = self.entry(name).await else {
            return false;
        };
        {
            let _transition = entry.transition.lock().await;
            self.disconnect_locked(&entry).await;
        }
        self.servers
            .write()
            .await
            .retain(|e| !Arc::ptr_eq(e, &entry));
        tracing::info!(server = %name, "unregistered server");
        true
    }

    /// Enable (then connect) or disable (after disconnecting) a server.
    pub async fn set_server_enabled(&self, name: &str, enabled: bool) -> Result<(), McpError> {
        let entry = self.require(name).await?;
        {
            let _transition = entry.transition.lock().await;
            let mut state = entry.state.lock().await;
            if state.config.enabled == enabled {
                return Ok(());
            }
            state.config.enabled = enabled;
            if enabled {
                state.status = ServerStatus::Disconnected;
                state.connection_attempts = 0;
                state.last_error = None;
            } else {
                drop(state);
                self.disconnect_locked(&entry).await;
            }
        }
        tracing::info!(server = %name, enabled, "server enabled flag changed");

        if enabled {
            self.connect_entry(&entry).await?;
        }
        Ok(())
    }

    // ─── Connection Transitions ──────────────────────────────────────────

    /// Connect one server. Explicit calls are not subject to the retry gate.
    pub async fn connect_server(&self, name: &str) -> Result<(), McpError> {
        let entry = self.require(name).await?;
        self.connect_entry(&entry).await
    }

    /// Disconnect one server; it always ends `Disconnected` (or `Disabled`).
    pub async fn disconnect_server(&self, name: &str) -> Result<(), McpError> {
        let entry = self.require(name).await?;
        let _transition = entry.transition.lock().await;
        self.disconnect_locked(&entry).await;
        Ok(())
    }

    /// Connect every enabled server concurrently. Returns the failures.
    pub async fn connect_all(&self) -> Vec<(String, McpError)> {
        let entries = self.entries().await;
        let mut targets = Vec::new();
        for entry in entries {
            if entry.state.lock().await.config.enabled {
                targets.push(entry);
            }
        }

        let results = join_all(targets.iter().map(|e| self.connect_entry(e))).await;
        let failures: Vec<(String, McpError)> = targets
            .iter()
            .zip(results)
            .filter_map(|(entry, result)| result.err().map(|e| (entry.name.clone(), e)))
            .collect();

        tracing::info!(
            servers = targets.len(),
            failed = failures.len(),
            "connect_all complete"
        );
        failures
    }

    /// Disconnect every server holding a client or caught mid-connect,
    /// concurrently.
    pub async fn disconnect_all(&self) {
        let entries = self.entries().await;
        let mut targets = Vec::new();
        for entry in entries {
            let state = entry.state.lock().await;
            let busy = state.client.is_some() || state.status == ServerStatus::Connecting;
            drop(state);
            if busy {
                targets.push(entry);
            }
        }

        join_all(targets.iter().map(|entry| async move {
            let _transition = entry.transition.lock().await;
            self.disconnect_locked(entry).await;
        }))
        .await;
    }

    async fn connect_entry(&self, entry: &Arc<ServerEntry>) -> Result<(), McpError> {
        let _transition = entry.transition.lock().await;

        let (config, existing) = {
            let state = entry.state.lock().await;
            if state.status == ServerStatus::Disabled {
                return Err(McpError::ServerUnavailable {
                    name: entry.name.clone(),
                });
            }
            let existing = match state.status {
                ServerStatus::Connected => state.client.clone(),
                _ => None,
            };
            (state.config.clone(), existing)
        };

        if let Some(client) = existing {
            if client.is_connected().await {
                return Ok(());
            }
            client.disconnect().await;
        }

        {
            let mut state = entry.state.lock().await;
            state.status = ServerStatus::Connecting;
            state.last_connection_attempt = Some(Utc::now());
            state.clear_connection();
        }
        tracing::debug!(server = %entry.name, "server connecting");

        let guard = ConnectingGuard {
            entry: entry.as_ref(),
            armed: true,
        };
        let client = Arc::new(McpClient::new(config, self.factory.clone()));
        let outcome = client.connect().await;
        guard.disarm();

        let mut state = entry.state.lock().await;
        match outcome {
            Ok(()) => {
                let caps = client.capabilities().await;
                state.status = ServerStatus::Connected;
                state.connection_attempts = 0;
                state.connected_at = Some(Utc::now());
                state.last_error = None;
                state.reconnect_pending = false;
                state.tool_count = caps.tools.len();
                state.resource_count = caps.resources.len();
                state.prompt_count = caps.prompts.len();
                state.client = Some(client);
                tracing::info!(
                    server = %entry.name,
                    tools = state.tool_count,
                    resources = state.resource_count,
                    prompts = state.prompt_count,
                    "server connected"
                );
                Ok(())
            }
            Err(e) => {
                state.status = ServerStatus::Error;
                state.connection_attempts += 1;
                state.last_error = Some(e.to_string());
                tracing::warn!(
                    server = %entry.name,
                    attempts = state.connection_attempts,
                    error = %e,
                    "server connection failed"
                );
                Err(e)
            }
        }
    }

    /// Caller must hold the entry's transition lock.
    async fn disconnect_locked(&self, entry: &ServerEntry) {
        let client = {
            let mut state = entry.state.lock().await;
            let client = state.client.take();
            state.clear_connection();
            state.reconnect_pending = false;
            state.status = state.idle_status();
            client
        };

        if let Some(client) = client {
            client.disconnect().await;
            tracing::info!(server = %entry.name, "server disconnected");
        }
    }

    // ─── Retry & Health ──────────────────────────────────────────────────

    /// Whether automatic reconnection may be attempted now.
    pub async fn should_retry_connection(&self, name: &str) -> bool {
        match self.entry(name).await {
            Some(entry) => entry.state.lock().await.retry_eligible(Utc::now()),
            None => false,
        }
    }

    /// One health pass over every server.
    ///
    /// Connected servers are probed; a failed probe disconnects and then
    /// reconnects if the retry gate allows. Servers in `Error`, and servers
    /// a failed probe left disconnected, are retried under the same gate.
    pub async fn run_health_check_cycle(&self) {
        let entries = self.entries().await;
        join_all(entries.iter().map(|e| self.check_entry(e))).await;
    }

    async fn check_entry(&self, entry: &Arc<ServerEntry>) {
        let (status, client, reconnect_pending) = {
            let state = entry.state.lock().await;
            (state.status, state.client.clone(), state.reconnect_pending)
        };

        match status {
            ServerStatus::Connected => {
                let healthy = match &client {
                    Some(client) => client.health_check().await,
                    None => false,
                };
                entry.state.lock().await.last_health_check = Some(Utc::now());
                if healthy {
                    return;
                }
                tracing::warn!(server = %entry.name, "health check failed, disconnecting");
                {
                    let _transition = entry.transition.lock().await;
                    self.disconnect_locked(entry).await;
                    let mut state = entry.state.lock().await;
                    if state.status == ServerStatus::Disconnected {
                        state.reconnect_pending = true;
                        state.last_error = Some("health check failed".into());
                    }
                }
                self.retry_if_eligible(entry).await;
            }
            ServerStatus::Error => self.retry_if_eligible(entry).await,
            ServerStatus::Disconnected if reconnect_pending => {
                self.retry_if_eligible(entry).await
            }
            _ => {}
        }
    }

    async fn retry_if_eligible(&self, entry: &Arc<ServerEntry>) {
        let (eligible, attempts) = {
            let state = entry.state.lock().await;
            (state.retry_eligible(Utc::now()), state.connection_attempts)
        };
        if !eligible {
            tracing::debug!(server = %entry.name, attempts, "reconnection not eligible");
            return;
        }
        tracing::info!(server = %entry.name, attempts, "attempting automatic reconnection");
        // Outcome is recorded on the entry.
        let _ = self.connect_entry(entry).await;
    }

    /// Start the periodic health loop. `false` if it is already running.
    pub async fn start_health_monitoring(self: &Arc<Self>, interval: Duration) -> bool {
        let mut monitor = self.monitor.lock().await;
        if monitor.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let weak = Arc::downgrade(self);
        *monitor = Some(PeriodicTask::spawn("health-monitor", interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(registry) => {
                        registry.run_health_check_cycle().await;
                        true
                    }
                    None => false,
                }
            }
        }));
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "health monitoring started"
        );
        true
    }

    /// Stop the health loop. `false` if it was not running.
    pub async fn stop_health_monitoring(&self) -> bool {
        let task = self.monitor.lock().await.take();
        match task {
            Some(task) => {
                task.stop().await;
                tracing::info!("health monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// The live client, only if the server is connected and its session is
    /// still up. `None` means unavailable, not an error.
    pub async fn get_server_by_name(&self, name: &str) -> Option<Arc<McpClient>> {
        let entry = self.entry(name).await?;
        let client = {
            let state = entry.state.lock().await;
            if state.status != ServerStatus::Connected {
                return None;
            }
            state.client.clone()?
        };
        if client.is_connected().await {
            Some(client)
        } else {
            None
        }
    }

    pub async fn get_server_info(&self, name: &str) -> Option<ServerInfo> {
        let entry = self.entry(name).await?;
        let info = entry.state.lock().await.snapshot();
        Some(info)
    }

    /// Snapshots of every server in registration order.
    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let entries = self.entries().await;
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            infos.push(entry.state.lock().await.snapshot());
        }
        infos
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.servers
            .read()
            .await
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            health_monitoring: self.is_monitoring().await,
            ..RegistryStats::default()
        };
        for info in self.list_servers().await {
            stats.total_servers += 1;
            stats.total_tools += info.tool_count;
            match info.status {
                ServerStatus::Connected => stats.connected += 1,
                ServerStatus::Disabled => stats.disabled += 1,
                ServerStatus::Error => stats.error += 1,
                ServerStatus::Disconnected | ServerStatus::Connecting => stats.disconnected += 1,
            }
        }
        stats
    }

    /// Stop monitoring and disconnect everything. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.stop_health_monitoring().await;
        self.disconnect_all().await;
        tracing::info!("server registry shut down");
    }

    // ─── Internals ───────────────────────────────────────────────────────

    async fn entries(&self) -> Vec<Arc<ServerEntry>> {
        self.servers.read().await.clone()
    }

    async fn entry(&self, name: &str) -> Option<Arc<ServerEntry>> {
        self.servers
            .read()
            .await
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    async fn require(&self, name: &str) -> Result<Arc<ServerEntry>, McpError> {
        self.entry(name).await.ok_or_else(|| McpError::ConfigError {
            reason: format!("unknown server '{name}'"),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
