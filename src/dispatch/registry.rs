//! Unified tool registry: the single call surface for invoking a capability
//! by name without knowing which server hosts it.
//!
//! Execution order for one call:
//! 1. resolve hosting servers from the discovery catalog
//! 2. run filters (no network activity if any rejects)
//! 3. select a host via the active strategy
//! 4. serve from the result cache on a live hit
//! 5. call the live client, record usage, cache successes

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::cache::{cache_key, ResultCache};
use super::strategy::{SelectionStrategy, ServerSelector};
use super::types::{
    DispatchSettings, DispatchStats, ToolExecutionResult, ToolRequest, UnifiedRegistryStats,
};
use crate::discovery::DiscoveryEngine;
use crate::mcp_client::McpError;
use crate::registry::ServerRegistry;

/// Predicate over `(tool_name, arguments)`; `false` rejects the call.
pub type ToolFilter = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

pub struct UnifiedToolRegistry {
    registry: Arc<ServerRegistry>,
    discovery: Arc<DiscoveryEngine>,
    filters: RwLock<Vec<ToolFilter>>,
    selector: Mutex<ServerSelector>,
    cache: Mutex<ResultCache>,
    stats: Mutex<DispatchStats>,
}

impl UnifiedToolRegistry {
    pub fn new(
        registry: Arc<ServerRegistry>,
        discovery: Arc<DiscoveryEngine>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            registry,
            discovery,
            filters: RwLock::new(Vec::new()),
            selector: Mutex::new(ServerSelector::new(settings.strategy)),
            cache: Mutex::new(ResultCache::new(
                settings.cache_enabled,
                settings.cache_ttl(),
                settings.max_cache_entries,
            )),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    // ─── Execution ───────────────────────────────────────────────────────

    /// Execute `name` (bare or `<server>.<tool>`) on one hosting server.
    ///
    /// Never fails: every problem is reported inside the returned result.
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> ToolExecutionResult {
        let started = Instant::now();
        let result = self.dispatch(name, arguments, started).await;

        let mut stats = self.stats.lock().await;
        stats.executions += 1;
        if result.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        result
    }

    async fn dispatch(&self, name: &str, arguments: Value, started: Instant) -> ToolExecutionResult {
        let targets = self.discovery.hosting_servers(name).await;
        if targets.is_empty() {
            let err = McpError::ToolNotFound {
                name: name.to_string(),
                suggestions: self.discovery.find_similar(name).await,
            };
            tracing::warn!(tool = %name, error = %err, "tool dispatch failed");
            return ToolExecutionResult::failed(name, None, &err, elapsed_ms(started));
        }

        if !self.passes_filters(name, &arguments).await {
            self.stats.lock().await.filtered += 1;
            let err = McpError::Filtered {
                tool: name.to_string(),
            };
            tracing::info!(tool = %name, "tool call rejected by filter");
            return ToolExecutionResult::failed(name, None, &err, elapsed_ms(started));
        }

        let target = {
            let mut selector = self.selector.lock().await;
            match selector.select(name, &targets) {
                Some(target) => target.clone(),
                None => {
                    let err = McpError::ToolNotFound {
                        name: name.to_string(),
                        suggestions: Vec::new(),
                    };
                    return ToolExecutionResult::failed(name, None, &err, elapsed_ms(started));
                }
            }
        };
        let server = target.server_name.as_str();

        let key = cache_key(&target.name, server, &arguments);
        let hit = self.cache.lock().await.get(&key);
        {
            let mut stats = self.stats.lock().await;
            if hit.is_some() {
                stats.cache_hits += 1;
            } else {
                stats.cache_misses += 1;
            }
        }
        if let Some(mut hit) = hit {
            tracing::debug!(tool = %name, server = %server, "serving cached tool result");
            hit.tool_name = name.to_string();
            return hit;
        }

        let Some(client) = self.registry.get_server_by_name(server).await else {
            let err = McpError::ServerUnavailable {
                name: server.to_string(),
            };
            tracing::warn!(tool = %name, server = %server, "selected server unavailable");
            return ToolExecutionResult::failed(name, Some(server), &err, elapsed_ms(started));
        };

        let call_started = Instant::now();
        let outcome = client.call_tool(&target.name, arguments).await;
        let call_ms = elapsed_ms(call_started);
        self.discovery
            .record_tool_usage(&target.name, server, call_ms)
            .await;

        let result = match outcome {
            Ok(value) => {
                tracing::info!(
                    tool = %name,
                    server = %server,
                    duration_ms = call_ms,
                    "tool executed"
                );
                ToolExecutionResult::succeeded(name, server, value, elapsed_ms(started))
            }
            Err(e) => {
                tracing::warn!(
                    tool = %name,
                    server = %server,
                    duration_ms = call_ms,
                    error = %e,
                    "tool execution failed"
                );
                ToolExecutionResult::failed(name, Some(server), &e, elapsed_ms(started))
            }
        };

        self.cache.lock().await.put(key, &result);
        result
    }

    /// Execute many calls. Results keep input order; one failure never
    /// prevents the others from running.
    pub async fn execute_batch_tools(
        &self,
        requests: &[ToolRequest],
        parallel: bool,
    ) -> Vec<ToolExecutionResult> {
        tracing::debug!(requests = requests.len(), parallel, "executing tool batch");
        if parallel {
            join_all(
                requests
                    .iter()
                    .map(|r| self.execute_tool(&r.tool_name, r.arguments.clone())),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(
                    self.execute_tool(&request.tool_name, request.arguments.clone())
                        .await,
                );
            }
            results
        }
    }

    /// Read a resource from the first healthy server that lists it.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        let hosts = self.discovery.resource_servers(uri).await;
        for server in &hosts {
            if let Some(client) = self.registry.get_server_by_name(server).await {
                return client.get_resource(uri).await;
            }
        }
        Err(self.unavailable(uri, &hosts))
    }

    /// Render a prompt on the first healthy server that hosts it.
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let targets = self.discovery.prompt_servers(name).await;
        for target in &targets {
            if let Some(client) = self.registry.get_server_by_name(&target.server_name).await {
                return client.get_prompt(&target.name, arguments).await;
            }
        }
        let hosts: Vec<String> = targets.into_iter().map(|t| t.server_name).collect();
        Err(self.unavailable(name, &hosts))
    }

    fn unavailable(&self, capability: &str, hosts: &[String]) -> McpError {
        match hosts.first() {
            Some(server) => McpError::ServerUnavailable {
                name: server.clone(),
            },
            None => McpError::ToolNotFound {
                name: capability.to_string(),
                suggestions: Vec::new(),
            },
        }
    }

    // ─── Filters & Strategy ──────────────────────────────────────────────

    /// Add a filter; filters run in registration order and the first
    /// rejection wins.
    pub async fn add_tool_filter<F>(&self, filter: F)
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        self.filters.write().await.push(Arc::new(filter));
    }

    pub async fn clear_filters(&self) {
        self.filters.write().await.clear();
    }

    async fn passes_filters(&self, name: &str, arguments: &Value) -> bool {
        let filters = self.filters.read().await;
        filters.iter().all(|f| f(name, arguments))
    }

    /// Applies from the next `execute_tool` call.
    pub async fn set_execution_strategy(&self, strategy: SelectionStrategy) {
        self.selector.lock().await.set_strategy(strategy);
        tracing::info!(strategy = %strategy, "execution strategy changed");
    }

    pub async fn execution_strategy(&self) -> SelectionStrategy {
        self.selector.lock().await.strategy()
    }

    // ─── Cache & Stats ───────────────────────────────────────────────────

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn purge_expired_cache(&self) -> usize {
        self.cache.lock().await.purge_expired()
    }

    pub async fn dispatch_stats(&self) -> DispatchStats {
        *self.stats.lock().await
    }

    pub async fn get_registry_stats(&self) -> UnifiedRegistryStats {
        UnifiedRegistryStats {
            capabilities: self.discovery.get_capability_summary().await,
            dispatch: *self.stats.lock().await,
            cache: self.cache.lock().await.stats(),
            strategy: self.selector.lock().await.strategy(),
            filters: self.filters.read().await.len(),
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

// ─── Tests ───────────────────────────────────────────────────────────────────
