//! `McpHub`: wires the registry, discovery engine, and dispatch layer
//! together from a [`HubConfig`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::config::HubConfig;
use crate::discovery::{CapabilitySummary, DiscoveryEngine};
use crate::dispatch::{ToolExecutionResult, ToolRequest, UnifiedToolRegistry};
use crate::mcp_client::{DefaultSessionFactory, McpError, SessionFactory};
use crate::registry::{RegistryStats, ServerRegistry};

pub struct McpHub {
    config: HubConfig,
    registry: Arc<ServerRegistry>,
    discovery: Arc<DiscoveryEngine>,
    dispatch: UnifiedToolRegistry,
    started: AtomicBool,
}

impl McpHub {
    /// Build a hub that reaches servers over their configured transports.
    pub fn from_config(config: HubConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultSessionFactory))
    }

    pub fn with_factory(config: HubConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let registry = Arc::new(ServerRegistry::new(factory));
        let discovery = Arc::new(DiscoveryEngine::new(registry.clone(), &config.discovery));
        let dispatch = UnifiedToolRegistry::new(registry.clone(), discovery.clone(), &config.dispatch);
        Self {
            config,
            registry,
            discovery,
            dispatch,
            started: AtomicBool::new(false),
        }
    }

    /// Register and connect every configured server, discover capabilities,
    /// and start the background loops that have an interval configured.
    ///
    /// Individual connection failures are logged and left to the health
    /// loop; only configuration errors are returned.
    pub async fn start(&self) -> Result<CapabilitySummary, McpError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(self.discovery.get_capability_summary().await);
        }

        for server in self.config.active_servers() {
            let name = server.name.clone();
            match self.registry.register_server(server).await {
                Ok(status) => tracing::debug!(server = %name, status = %status, "server registered"),
                Err(e) => {
                    self.started.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        let results = self.discovery.discover_all_capabilities().await;
        let failed = results.iter().filter(|r| !r.success).count();

        if let Some(interval) = self.config.health_check_interval() {
            self.registry.start_health_monitoring(interval).await;
        }
        if let Some(interval) = self.config.discovery.auto_discovery_interval() {
            self.discovery.start_auto_discovery(interval).await;
        }

        let summary = self.discovery.get_capability_summary().await;
        tracing::info!(
            servers = results.len(),
            failed,
            tools = summary.total_tools,
            conflicts = summary.conflicts.len(),
            "mcp hub started"
        );
        Ok(summary)
    }

    pub async fn execute_tool(&self, name: &str, arguments: Value) -> ToolExecutionResult {
        self.dispatch.execute_tool(name, arguments).await
    }

    pub async fn execute_batch_tools(
        &self,
        requests: &[ToolRequest],
        parallel: bool,
    ) -> Vec<ToolExecutionResult> {
        self.dispatch.execute_batch_tools(requests, parallel).await
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn discovery(&self) -> &Arc<DiscoveryEngine> {
        &self.discovery
    }

    pub fn dispatch(&self) -> &UnifiedToolRegistry {
        &self.dispatch
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Stop background loops, disconnect and unregister every server.
    /// Idempotent; a later `start` registers the configured servers afresh.
    pub async fn shutdown(&self) {
        self.discovery.stop_auto_discovery().await;
        self.registry.shutdown().await;
        for name in self.registry.server_names().await {
            self.registry.unregister_server(&name).await;
        }
        self.discovery.clear_cache().await;
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("mcp hub shut down");
    }
}
