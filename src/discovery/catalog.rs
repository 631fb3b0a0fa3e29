//! Capability catalog: the two-tier name table.
//!
//! The first server (in registration order) to expose a tool name owns the
//! bare name. Later servers exposing the same name stay reachable through the
//! bare name for strategy-based selection and are additionally listed under
//! `<server>.<tool>`, which routes to that server alone. Prompts follow the
//! same policy; resources are keyed by URI with every host kept.
//!
//! Usage statistics are keyed by `(server, tool)` and survive rebuilds.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::types::{
    AvailabilityStatus, CallTarget, CapabilitySummary, DiscoveryResult, PromptInfo, ResourceInfo,
    ToolConflict, ToolInfo,
};

/// Minimum similarity for a "did you mean" suggestion.
const SUGGESTION_FLOOR: f64 = 0.3;

#[derive(Debug, Clone, Default)]
struct ToolUsage {
    count: u64,
    last_used: Option<DateTime<Utc>>,
    response_time_ms: Option<u64>,
}

// ─── CapabilityCatalog ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CapabilityCatalog {
    tools: Vec<ToolInfo>,
    /// Bare name → tool entries hosting it, in registration order.
    tool_index: HashMap<String, Vec<usize>>,
    /// `<server>.<tool>` → entry, for every host after the first.
    qualified_tools: HashMap<String, usize>,
    resources: Vec<ResourceInfo>,
    prompts: Vec<PromptInfo>,
    prompt_index: HashMap<String, Vec<usize>>,
    qualified_prompts: HashMap<String, usize>,
    conflicts: Vec<ToolConflict>,
    usage: HashMap<(String, String), ToolUsage>,
}

impl CapabilityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog contents with the successful `results`, in order.
    pub fn rebuild(&mut self, results: &[DiscoveryResult]) {
        self.tools.clear();
        self.tool_index.clear();
        self.qualified_tools.clear();
        self.resources.clear();
        self.prompts.clear();
        self.prompt_index.clear();
        self.qualified_prompts.clear();
        self.conflicts.clear();

        for result in results.iter().filter(|r| r.success) {
            let server = result.server_name.as_str();
            for def in &result.tools {
                self.add_tool(ToolInfo::from_definition(server, def));
            }
            for def in &result.resources {
                self.resources.push(ResourceInfo::from_definition(server, def));
            }
            for def in &result.prompts {
                self.add_prompt(PromptInfo::from_definition(server, def));
            }
        }
    }

    fn add_tool(&mut self, mut info: ToolInfo) {
        if let Some(usage) = self.usage.get(&(info.server_name.clone(), info.name.clone())) {
            info.usage_count = usage.count;
            info.last_used = usage.last_used;
            info.response_time_ms = usage.response_time_ms;
        }

        let idx = self.tools.len();
        let hosts = self.tool_index.entry(info.name.clone()).or_default();

        if let Some(&primary) = hosts.first() {
            if hosts
                .iter()
                .any(|&i| self.tools[i].server_name == info.server_name)
            {
                tracing::debug!(server = %info.server_name, tool = %info.name, "duplicate tool listing ignored");
                return;
            }
            let primary_server = self.tools[primary].server_name.clone();
            let qualified = format!("{}.{}", info.server_name, info.name);
            tracing::debug!(
                tool = %info.name,
                primary = %primary_server,
                server = %info.server_name,
                qualified = %qualified,
                "tool name conflict, registering qualified name"
            );
            self.conflicts.push(ToolConflict {
                tool_name: info.name.clone(),
                primary_server,
                server: info.server_name.clone(),
                qualified_name: qualified.clone(),
            });
            self.qualified_tools.insert(qualified.clone(), idx);
            info.catalog_name = qualified;
        }

        hosts.push(idx);
        self.tools.push(info);
    }

    fn add_prompt(&mut self, mut info: PromptInfo) {
        let idx = self.prompts.len();
        let hosts = self.prompt_index.entry(info.name.clone()).or_default();
        if !hosts.is_empty() {
            if hosts
                .iter()
                .any(|&i| self.prompts[i].server_name == info.server_name)
            {
                return;
            }
            let qualified = format!("{}.{}", info.server_name, info.name);
            self.qualified_prompts.insert(qualified.clone(), idx);
            info.catalog_name = qualified;
        }
        hosts.push(idx);
        self.prompts.push(info);
    }

    // ─── Resolution ──────────────────────────────────────────────────────

    /// Entry indices reachable under `name`: every host for a bare name,
    /// one host for a qualified name.
    fn tool_entries(&self, name: &str) -> Vec<usize> {
        if let Some(hosts) = self.tool_index.get(name) {
            return hosts.clone();
        }
        self.qualified_tools
            .get(name)
            .map(|&i| vec![i])
            .unwrap_or_default()
    }

    /// Hosts for `name` not marked unavailable, in registration order.
    pub fn tool_targets(&self, name: &str) -> Vec<CallTarget> {
        self.tool_entries(name)
            .into_iter()
            .map(|i| &self.tools[i])
            .filter(|t| t.availability_status != AvailabilityStatus::Unavailable)
            .map(|t| CallTarget {
                server_name: t.server_name.clone(),
                name: t.name.clone(),
            })
            .collect()
    }

    /// Every entry for `name`, whatever its availability.
    pub fn tool_hosts(&self, name: &str) -> Vec<ToolInfo> {
        self.tool_entries(name)
            .into_iter()
            .map(|i| self.tools[i].clone())
            .collect()
    }

    pub fn prompt_targets(&self, name: &str) -> Vec<CallTarget> {
        let entries = match self.prompt_index.get(name) {
            Some(hosts) => hosts.clone(),
            None => self
                .qualified_prompts
                .get(name)
                .map(|&i| vec![i])
                .unwrap_or_default(),
        };
        entries
            .into_iter()
            .map(|i| &self.prompts[i])
            .filter(|p| p.availability_status != AvailabilityStatus::Unavailable)
            .map(|p| CallTarget {
                server_name: p.server_name.clone(),
                name: p.name.clone(),
            })
            .collect()
    }

    /// Servers exposing `uri`, in registration order.
    pub fn resource_servers(&self, uri: &str) -> Vec<String> {
        self.resources
            .iter()
            .filter(|r| r.uri == uri && r.availability_status != AvailabilityStatus::Unavailable)
            .map(|r| r.server_name.clone())
            .collect()
    }

    pub fn contains_tool(&self, name: &str) -> bool {
        self.tool_index.contains_key(name) || self.qualified_tools.contains_key(name)
    }

    // ─── Mutation ────────────────────────────────────────────────────────

    pub fn set_availability(&mut self, server: &str, tool: &str, status: AvailabilityStatus) {
        let now = Utc::now();
        for info in self
            .tools
            .iter_mut()
            .filter(|t| t.server_name == server && t.name == tool)
        {
            info.availability_status = status;
            info.last_checked = Some(now);
        }
    }

    pub fn record_usage(&mut self, tool: &str, server: &str, response_time_ms: u64) {
        let now = Utc::now();
        let usage = self
            .usage
            .entry((server.to_string(), tool.to_string()))
            .or_default();
        usage.count += 1;
        usage.last_used = Some(now);
        usage.response_time_ms = Some(response_time_ms);
        let snapshot = usage.clone();

        for info in self
            .tools
            .iter_mut()
            .filter(|t| t.server_name == server && t.name == tool)
        {
            info.usage_count = snapshot.count;
            info.last_used = snapshot.last_used;
            info.response_time_ms = snapshot.response_time_ms;
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn tools(&self) -> Vec<ToolInfo> {
        self.tools.clone()
    }

    pub fn resources(&self) -> Vec<ResourceInfo> {
        self.resources.clone()
    }

    pub fn prompts(&self) -> Vec<PromptInfo> {
        self.prompts.clone()
    }

    pub fn conflicts(&self) -> Vec<ToolConflict> {
        self.conflicts.clone()
    }

    /// Case-insensitive substring match over catalog name and description.
    pub fn search(&self, query: &str) -> Vec<ToolInfo> {
        let needle = query.to_lowercase();
        self.tools
            .iter()
            .filter(|t| {
                t.catalog_name.to_lowercase().contains(&needle)
                    || t.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Catalog names closest to `name` by edit distance, best first.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let query = name.to_lowercase();
        let query_suffix = query.rsplit('.').next().unwrap_or(&query).to_string();

        let mut scored: Vec<(String, f64)> = self
            .tools
            .iter()
            .filter(|t| t.catalog_name != name)
            .map(|t| {
                let score = similarity(&query, &t.catalog_name.to_lowercase())
                    .max(similarity(&query_suffix, &t.name.to_lowercase()));
                (t.catalog_name.clone(), score)
            })
            .filter(|(_, score)| *score > SUGGESTION_FLOOR)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.dedup_by(|a, b| a.0 == b.0);
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name).collect()
    }

    pub fn summary(&self) -> CapabilitySummary {
        let mut tools_by_server: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tool in &self.tools {
            tools_by_server
                .entry(tool.server_name.clone())
                .or_default()
                .push(tool.catalog_name.clone());
        }
        for server in self
            .resources
            .iter()
            .map(|r| &r.server_name)
            .chain(self.prompts.iter().map(|p| &p.server_name))
        {
            tools_by_server.entry(server.clone()).or_default();
        }

        CapabilitySummary {
            total_tools: self.tools.len(),
            unique_tool_names: self.tool_index.len(),
            total_resources: self.resources.len(),
            total_prompts: self.prompts.len(),
            servers_discovered: tools_by_server.len(),
            tools_by_server,
            conflicts: self.conflicts.clone(),
            total_tool_calls: self.usage.values().map(|u| u.count).sum(),
            last_discovery: None,
        }
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::{McpPromptDefinition, McpToolDefinition};

    fn tool(name: &str, description: &str) -> McpToolDefinition {
        McpToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn result(server: &str, tools: &[&str]) -> DiscoveryResult {
        DiscoveryResult {
            server_name: server.to_string(),
            success: true,
            tools: tools.iter().map(|t| tool(t, &format!("{t} on {server}"))).collect(),
            resources: Vec::new(),
            prompts: Vec::new(),
            error_message: None,
            discovered_at: Utc::now(),
            from_cache: false,
        }
    }

    #[test]
    fn test_first_host_owns_bare_name() {
        let mut catalog = CapabilityCatalog::new();
        catalog.rebuild(&[result("a", &["echo", "add"]), result("b", &["echo"])]);

        let conflicts = catalog.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].primary_server, "a");
        assert_eq!(conflicts[0].qualified_name, "b.echo");

        let bare: Vec<_> = catalog
            .tool_targets("echo")
            .into_iter()
            .map(|t| t.server_name)
            .collect();
        assert_eq!(bare, vec!["a", "b"]);

        let qualified = catalog.tool_targets("b.echo");
        assert_eq!(
            qualified,
            vec![CallTarget {
                server_name: "b".into(),
                name: "echo".into()
            }]
        );
        assert!(catalog.tool_targets("a.echo").is_empty());
    }

    #[test]
    fn test_failed_results_are_skipped() {
        let mut catalog = CapabilityCatalog::new();
        catalog.rebuild(&[
            DiscoveryResult::failed("down", "not connected"),
            result("up", &["echo"]),
        ]);
        assert_eq!(catalog.tools().len(), 1);
        assert!(catalog.conflicts().is_empty());
    }

    #[test]
    fn test_duplicate_listing_on_same_server_ignored() {
        let mut catalog = CapabilityCatalog::new();
        catalog.rebuild(&[result("a", &["echo", "echo"])]);
        assert_eq!(catalog.tools().len(), 1);
        assert!(catalog.conflicts().is_empty());
    }

    #[test]
    fn test_unavailable_hosts_are_excluded() {
        let mut catalog = CapabilityCatalog::new();
        catalog.rebuild(&[result("a", &["echo"]), result("b", &["echo"])]);
        catalog.set_availability("a", "echo", AvailabilityStatus::Unavailable);

        let hosts: Vec<_> = catalog
            .tool_targets("echo")
            .into_iter()
            .map(|t| t.server_name)
            .collect();
        assert_eq!(hosts, vec!["b"]);
        assert_eq!(catalog.tool_hosts("echo").len(), 2);
    }

    #[test]
    fn test_usage_survives_rebuild() {
        let mut catalog = CapabilityCatalog::new();
        catalog.rebuild(&[result("a", &["echo"])]);
        catalog.record_usage("echo", "a", 12);
        catalog.record_usage("echo", "a", 30);

        catalog.rebuild(&[result("a", &["echo"])]);
        let info = &catalog.tool_hosts("echo")[0];
        assert_eq!(info.usage_count, 2);
        assert_eq!(info.response_time_ms, Some(30));
        assert!(info.last_used.is_some());
        assert_eq!(catalog.summary().total_tool_calls, 2);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let mut catalog = CapabilityCatalog::new();
        let mut r = result("a", &[]);
        r.tools = vec![
            tool("read_file", "Read a FILE from disk"),
            tool("list_dir", "List a directory"),
        ];
        catalog.rebuild(&[r]);

        let hits: Vec<_> = catalog.search("file").into_iter().map(|t| t.name).collect();
        assert_eq!(hits, vec!["read_file"]);
        assert_eq!(catalog.search("LIST").len(), 1);
        assert!(catalog.search("nothing").is_empty());
    }

    #[test]
    fn test_prompts_follow_conflict_policy() {
        let mut catalog = CapabilityCatalog::new();
        let mut a = result("a", &[]);
        let mut b = result("b", &[]);
        let prompt = McpPromptDefinition {
            name: "summarize".into(),
            description: String::new(),
            arguments: Vec::new(),
        };
        a.prompts = vec![prompt.clone()];
        b.prompts = vec![prompt];
        catalog.rebuild(&[a, b]);

        assert_eq!(catalog.prompt_targets("summarize").len(), 2);
        assert_eq!(catalog.prompt_targets("b.summarize")[0].server_name, "b");
    }

    #[test]
    fn test_find_similar_suggests_close_names() {
        let mut catalog = CapabilityCatalog::new();
        catalog.rebuild(&[result("a", &["echo", "add", "list_dir"])]);

        let suggestions = catalog.find_similar("ech", 3);
        assert_eq!(suggestions.first().map(String::as_str), Some("echo"));
        assert!(!suggestions.contains(&"list_dir".to_string()));
        assert!(catalog.find_similar("zzzzzzzz", 3).is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let mut catalog = CapabilityCatalog::new();
        catalog.rebuild(&[result("a", &["echo", "add"]), result("b", &["echo"])]);
        let summary = catalog.summary();
        assert_eq!(summary.total_tools, 3);
        assert_eq!(summary.unique_tool_names, 2);
        assert_eq!(summary.servers_discovered, 2);
        assert_eq!(summary.tools_by_server["b"], vec!["b.echo"]);
        assert_eq!(summary.conflicts.len(), 1);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert!((similarity("", "") - 1.0).abs() < f64::EPSILON);
    }
}
