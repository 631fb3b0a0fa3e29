//! Discovery engine: builds the capability catalog from live servers.
//!
//! Each server's discovery result is cached for `cache_ttl`; the catalog is
//! rebuilt from the per-server results in registration order so the conflict
//! policy stays deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use super::catalog::CapabilityCatalog;
use super::types::{
    AvailabilityStatus, CallTarget, CapabilitySummary, DiscoveryResult, PromptInfo, ResourceInfo,
    ToolInfo,
};
use crate::mcp_client::McpError;
use crate::registry::{ServerRegistry, ServerStatus};
use crate::task::PeriodicTask;

/// Suggestions attached to "tool not found" errors.
const MAX_SUGGESTIONS: usize = 3;

// ─── Settings ────────────────────────────────────────────────────────────────

/// Discovery tuning, read from the `discovery` config section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoverySettings {
    /// How long a server's discovery result is reused.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Period of the auto-discovery loop; `None` or 0 disables it.
    #[serde(default)]
    pub auto_discovery_interval_secs: Option<u64>,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            auto_discovery_interval_secs: None,
        }
    }
}

impl DiscoverySettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn auto_discovery_interval(&self) -> Option<Duration> {
        self.auto_discovery_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

// ─── DiscoveryEngine ─────────────────────────────────────────────────────────

struct CachedDiscovery {
    result: DiscoveryResult,
    cached_at: Instant,
}

pub struct DiscoveryEngine {
    registry: Arc<ServerRegistry>,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, CachedDiscovery>>,
    catalog: RwLock<CapabilityCatalog>,
    last_discovery: RwLock<Option<DateTime<Utc>>>,
    auto_discovery: Mutex<Option<PeriodicTask>>,
}

impl DiscoveryEngine {
    pub fn new(registry: Arc<ServerRegistry>, settings: &DiscoverySettings) -> Self {
        Self::with_cache_ttl(registry, settings.cache_ttl())
    }

    pub fn with_cache_ttl(registry: Arc<ServerRegistry>, cache_ttl: Duration) -> Self {
        Self {
            registry,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
            catalog: RwLock::new(CapabilityCatalog::new()),
            last_discovery: RwLock::new(None),
            auto_discovery: Mutex::new(None),
        }
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    /// Discover every enabled server concurrently and rebuild the catalog.
    ///
    /// Servers that are not healthy yield a failed result; their tools drop
    /// out of the catalog.
    pub async fn discover_all_capabilities(&self) -> Vec<DiscoveryResult> {
        let servers: Vec<String> = self
            .registry
            .list_servers()
            .await
            .into_iter()
            .filter(|s| s.status != ServerStatus::Disabled)
            .map(|s| s.config.name)
            .collect();

        let results = join_all(servers.iter().map(|s| self.discover_server_capabilities(s))).await;

        {
            let mut catalog = self.catalog.write().await;
            catalog.rebuild(&results);
            let summary = catalog.summary();
            tracing::info!(
                servers = results.len(),
                succeeded = results.iter().filter(|r| r.success).count(),
                tools = summary.total_tools,
                resources = summary.total_resources,
                prompts = summary.total_prompts,
                conflicts = summary.conflicts.len(),
                "capability discovery complete"
            );
        }
        *self.last_discovery.write().await = Some(Utc::now());
        results
    }

    /// Discover one server, reusing a cached result younger than the TTL.
    ///
    /// Updates the per-server cache only; the catalog changes on the next
    /// [`discover_all_capabilities`](Self::discover_all_capabilities) or
    /// [`refresh_server`](Self::refresh_server).
    pub async fn discover_server_capabilities(&self, name: &str) -> DiscoveryResult {
        let Some(client) = self.registry.get_server_by_name(name).await else {
            self.cache.write().await.remove(name);
            let reason = match self.registry.get_server_info(name).await {
                Some(info) => format!("server is {}", info.status),
                None => "unknown server".to_string(),
            };
            tracing::debug!(server = %name, reason = %reason, "skipping discovery");
            return DiscoveryResult::failed(name, reason);
        };

        if let Some(cached) = self.cached(name).await {
            tracing::debug!(server = %name, "using cached discovery result");
            return cached;
        }

        match client.refresh_capabilities().await {
            Ok(caps) => {
                let result = DiscoveryResult {
                    server_name: name.to_string(),
                    success: true,
                    tools: caps.tools,
                    resources: caps.resources,
                    prompts: caps.prompts,
                    error_message: None,
                    discovered_at: Utc::now(),
                    from_cache: false,
                };
                self.cache.write().await.insert(
                    name.to_string(),
                    CachedDiscovery {
                        result: result.clone(),
                        cached_at: Instant::now(),
                    },
                );
                result
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "capability discovery failed");
                self.cache.write().await.remove(name);
                DiscoveryResult::failed(name, e.to_string())
            }
        }
    }

    /// Force a fresh discovery of one server and fold it into the catalog.
    pub async fn refresh_server(&self, name: &str) -> DiscoveryResult {
        self.invalidate_server(name).await;
        let result = self.discover_server_capabilities(name).await;

        let order = self.registry.server_names().await;
        let cache = self.cache.read().await;
        let results: Vec<DiscoveryResult> = order
            .iter()
            .filter_map(|server| cache.get(server).map(|c| c.result.clone()))
            .collect();
        drop(cache);
        self.catalog.write().await.rebuild(&results);
        result
    }

    async fn cached(&self, name: &str) -> Option<DiscoveryResult> {
        let cache = self.cache.read().await;
        let entry = cache.get(name)?;
        if entry.cached_at.elapsed() >= self.cache_ttl {
            return None;
        }
        let mut result = entry.result.clone();
        result.from_cache = true;
        Some(result)
    }

    pub async fn invalidate_server(&self, name: &str) {
        self.cache.write().await.remove(name);
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    // ─── Availability & Usage ────────────────────────────────────────────

    /// Re-check that `name` is still listed by its hosting servers.
    ///
    /// Returns `Available` if any host still lists it.
    pub async fn update_tool_availability(&self, name: &str) -> Result<AvailabilityStatus, McpError> {
        let hosts = self.catalog.read().await.tool_hosts(name);
        if hosts.is_empty() {
            return Err(McpError::ToolNotFound {
                name: name.to_string(),
                suggestions: self.find_similar(name).await,
            });
        }

        let mut overall = AvailabilityStatus::Unavailable;
        for host in hosts {
            let status = match self.registry.get_server_by_name(&host.server_name).await {
                Some(client) => match client.refresh_capabilities().await {
                    Ok(caps) if caps.tools.iter().any(|t| t.name == host.name) => {
                        AvailabilityStatus::Available
                    }
                    Ok(_) => AvailabilityStatus::Unavailable,
                    Err(e) => {
                        tracing::debug!(server = %host.server_name, error = %e, "availability probe failed");
                        AvailabilityStatus::Unavailable
                    }
                },
                None => AvailabilityStatus::Unavailable,
            };
            tracing::debug!(
                tool = %host.name,
                server = %host.server_name,
                status = ?status,
                "tool availability updated"
            );
            self.catalog
                .write()
                .await
                .set_availability(&host.server_name, &host.name, status);
            if status == AvailabilityStatus::Available {
                overall = AvailabilityStatus::Available;
            }
        }
        Ok(overall)
    }

    /// Count one execution of `tool` on `server`.
    pub async fn record_tool_usage(&self, tool: &str, server: &str, response_time_ms: u64) {
        self.catalog
            .write()
            .await
            .record_usage(tool, server, response_time_ms);
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Servers that can serve `name` (bare or qualified), in registration order.
    pub async fn hosting_servers(&self, name: &str) -> Vec<CallTarget> {
        self.catalog.read().await.tool_targets(name)
    }

    pub async fn prompt_servers(&self, name: &str) -> Vec<CallTarget> {
        self.catalog.read().await.prompt_targets(name)
    }

    pub async fn resource_servers(&self, uri: &str) -> Vec<String> {
        self.catalog.read().await.resource_servers(uri)
    }

    pub async fn get_tool(&self, name: &str) -> Option<ToolInfo> {
        self.catalog.read().await.tool_hosts(name).into_iter().next()
    }

    pub async fn get_all_tools(&self) -> Vec<ToolInfo> {
        self.catalog.read().await.tools()
    }

    pub async fn get_all_resources(&self) -> Vec<ResourceInfo> {
        self.catalog.read().await.resources()
    }

    pub async fn get_all_prompts(&self) -> Vec<PromptInfo> {
        self.catalog.read().await.prompts()
    }

    pub async fn search_tools(&self, query: &str) -> Vec<ToolInfo> {
        self.catalog.read().await.search(query)
    }

    pub async fn find_similar(&self, name: &str) -> Vec<String> {
        self.catalog.read().await.find_similar(name, MAX_SUGGESTIONS)
    }

    pub async fn get_capability_summary(&self) -> CapabilitySummary {
        let mut summary = self.catalog.read().await.summary();
        summary.last_discovery = *self.last_discovery.read().await;
        summary
    }

    // ─── Auto-discovery ──────────────────────────────────────────────────

    /// Start periodic re-discovery. `false` if already running.
    pub async fn start_auto_discovery(self: &Arc<Self>, interval: Duration) -> bool {
        let mut task = self.auto_discovery.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let weak = Arc::downgrade(self);
        *task = Some(PeriodicTask::spawn("auto-discovery", interval, move || {
            let weak = weak.clone();
            async move {
                let Some(engine) = weak.upgrade() else {
                    return false;
                };
                engine.discover_all_capabilities().await;
                true
            }
        }));
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "auto-discovery started"
        );
        true
    }

    /// Stop periodic re-discovery. `false` if it was not running.
    pub async fn stop_auto_discovery(&self) -> bool {
        let task = self.auto_discovery.lock().await.take();
        match task {
            Some(task) => {
                task.stop().await;
                tracing::info!("auto-discovery stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_auto_discovering(&self) -> bool {
        self.auto_discovery
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::ServerConfig;
    use crate::testing::{FakeServer, FakeSessionFactory};

    async fn setup(
        servers: Vec<FakeServer>,
        cache_ttl: Duration,
    ) -> (Vec<Arc<FakeServer>>, Arc<ServerRegistry>, Arc<DiscoveryEngine>) {
        let factory = Arc::new(FakeSessionFactory::new());
        let registry = Arc::new(ServerRegistry::new(factory.clone()));
        let mut handles = Vec::new();
        let mut names = Vec::new();
        for server in servers {
            let handle = factory.add(server);
            names.push(handle.name().to_string());
            handles.push(handle);
        }
        for name in &names {
            let mut config = ServerConfig::stdio(name, "fake", &[]);
            config.retry_delay_ms = 0;
            registry.register_server(config).await.unwrap();
        }
        let engine = Arc::new(DiscoveryEngine::with_cache_ttl(registry.clone(), cache_ttl));
        (handles, registry, engine)
    }

    const LONG: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_single_server_end_to_end_catalog() {
        let (_s, _r, engine) =
            setup(vec![FakeServer::new("tools").with_tools(&["echo", "add"])], LONG).await;

        let results = engine.discover_all_capabilities().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert!(!results[0].from_cache);

        let summary = engine.get_capability_summary().await;
        assert_eq!(summary.total_tools, 2);
        assert!(summary.conflicts.is_empty());
        assert!(summary.last_discovery.is_some());
    }

    #[tokio::test]
    async fn test_conflicting_tool_gets_qualified_alias() {
        let (_s, _r, engine) = setup(
            vec![
                FakeServer::new("a").with_tools(&["echo"]),
                FakeServer::new("b").with_tools(&["echo"]),
            ],
            LONG,
        )
        .await;
        engine.discover_all_capabilities().await;

        let summary = engine.get_capability_summary().await;
        assert_eq!(summary.total_tools, 2);
        assert_eq!(summary.conflicts.len(), 1);
        assert_eq!(summary.conflicts[0].primary_server, "a");
        assert_eq!(summary.conflicts[0].qualified_name, "b.echo");

        let bare = engine.hosting_servers("echo").await;
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[0].server_name, "a");

        let qualified = engine.hosting_servers("b.echo").await;
        assert_eq!(
            qualified,
            vec![CallTarget {
                server_name: "b".into(),
                name: "echo".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_second_discovery_served_from_cache() {
        let (servers, _r, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo"])], LONG).await;

        engine.discover_all_capabilities().await;
        servers[0].set_tools(&["echo", "add"]);
        let again = engine.discover_server_capabilities("a").await;

        assert!(again.from_cache);
        assert_eq!(again.tools.len(), 1);

        engine.invalidate_server("a").await;
        let fresh = engine.discover_server_capabilities("a").await;
        assert!(!fresh.from_cache);
        assert_eq!(fresh.tools.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_queries_server() {
        let (servers, _r, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo"])], Duration::ZERO).await;

        engine.discover_all_capabilities().await;
        servers[0].set_tools(&["echo", "add"]);
        engine.discover_all_capabilities().await;

        assert_eq!(engine.get_all_tools().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_server_drops_out_of_catalog() {
        let (servers, _r, engine) = setup(
            vec![
                FakeServer::new("a").with_tools(&["echo"]),
                FakeServer::new("b").with_tools(&["add"]),
            ],
            Duration::ZERO,
        )
        .await;
        engine.discover_all_capabilities().await;
        assert_eq!(engine.get_all_tools().await.len(), 2);

        servers[1].set_healthy(false);
        let results = engine.discover_all_capabilities().await;

        let b = results.iter().find(|r| r.server_name == "b").unwrap();
        assert!(!b.success);
        assert!(b.error_message.is_some());
        let names: Vec<String> = engine.get_all_tools().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo"]);
    }

    #[tokio::test]
    async fn test_disconnected_server_reports_status() {
        let (_s, registry, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo"])], LONG).await;
        engine.discover_all_capabilities().await;

        registry.disconnect_server("a").await.unwrap();
        let result = engine.discover_server_capabilities("a").await;

        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("server is disconnected"));
        assert!(!engine.discover_server_capabilities("a").await.from_cache);
    }

    #[tokio::test]
    async fn test_disabled_servers_are_skipped() {
        let (_s, registry, engine) = setup(
            vec![
                FakeServer::new("a").with_tools(&["echo"]),
                FakeServer::new("b").with_tools(&["add"]),
            ],
            LONG,
        )
        .await;
        registry.set_server_enabled("b", false).await.unwrap();

        let results = engine.discover_all_capabilities().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].server_name, "a");
    }

    #[tokio::test]
    async fn test_update_availability_marks_removed_tool() {
        let (servers, _r, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo", "add"])], LONG).await;
        engine.discover_all_capabilities().await;

        servers[0].set_tools(&["echo"]);
        let status = engine.update_tool_availability("add").await.unwrap();
        assert_eq!(status, AvailabilityStatus::Unavailable);
        assert!(engine.hosting_servers("add").await.is_empty());

        let status = engine.update_tool_availability("echo").await.unwrap();
        assert_eq!(status, AvailabilityStatus::Available);
    }

    #[tokio::test]
    async fn test_update_availability_unknown_tool_suggests() {
        let (_s, _r, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo"])], LONG).await;
        engine.discover_all_capabilities().await;

        let err = engine.update_tool_availability("ech").await.unwrap_err();
        match err {
            McpError::ToolNotFound { suggestions, .. } => assert_eq!(suggestions, vec!["echo"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_usage_recorded_in_summary() {
        let (_s, _r, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo"])], LONG).await;
        engine.discover_all_capabilities().await;

        engine.record_tool_usage("echo", "a", 12).await;
        engine.record_tool_usage("echo", "a", 8).await;

        let tool = engine.get_tool("echo").await.unwrap();
        assert_eq!(tool.usage_count, 2);
        assert!(tool.last_used.is_some());
        assert_eq!(engine.get_capability_summary().await.total_tool_calls, 2);
    }

    #[tokio::test]
    async fn test_refresh_server_updates_catalog() {
        let (servers, _r, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo"])], LONG).await;
        engine.discover_all_capabilities().await;

        servers[0].set_tools(&["echo", "add"]);
        let result = engine.refresh_server("a").await;

        assert!(result.success);
        assert_eq!(engine.hosting_servers("add").await.len(), 1);
    }

    #[tokio::test]
    async fn test_resources_and_prompts_catalogued() {
        let (_s, _r, engine) = setup(
            vec![FakeServer::new("docs")
                .with_tools(&["echo"])
                .with_resource("file:///notes.txt")
                .with_prompt("summarize")],
            LONG,
        )
        .await;
        engine.discover_all_capabilities().await;

        assert_eq!(engine.resource_servers("file:///notes.txt").await, vec!["docs"]);
        assert_eq!(engine.prompt_servers("summarize").await.len(), 1);
        assert_eq!(engine.get_all_resources().await.len(), 1);
        assert_eq!(engine.get_all_prompts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_discovery_start_stop() {
        let (servers, _r, engine) =
            setup(vec![FakeServer::new("a").with_tools(&["echo"])], Duration::ZERO).await;

        assert!(engine.start_auto_discovery(Duration::from_millis(20)).await);
        assert!(!engine.start_auto_discovery(Duration::from_millis(20)).await);
        servers[0].set_tools(&["echo", "add"]);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(engine.get_all_tools().await.len(), 2);
        assert!(engine.stop_auto_discovery().await);
        assert!(!engine.stop_auto_discovery().await);
        assert!(!engine.is_auto_discovering().await);
    }
}
