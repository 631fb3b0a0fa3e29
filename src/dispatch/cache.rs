//! Result cache for successful tool executions.
//!
//! Keys are SHA-256 over `tool \0 server \0 canonical-json(arguments)`, so two
//! argument objects with the same pairs in a different order share a key.
//! Entries expire lazily on read; when full, the entry closest to expiry is
//! evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::types::{CacheStats, ToolExecutionResult};

struct CacheEntry {
    result: ToolExecutionResult,
    expires_at: Instant,
}

pub struct ResultCache {
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new(enabled: bool, ttl: Duration, max_entries: usize) -> Self {
        Self {
            enabled,
            ttl,
            max_entries,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.max_entries > 0 && !self.ttl.is_zero()
    }

    /// A live cached result, marked `cached`. Expired entries are dropped.
    pub fn get(&mut self, key: &str) -> Option<ToolExecutionResult> {
        if !self.is_enabled() {
            return None;
        }
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits += 1;
                let mut result = entry.result.clone();
                result.cached = true;
                result.execution_time_ms = 0;
                Some(result)
            }
            Some(_) => {
                self.entries.remove(key);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result. Failures are never cached.
    pub fn put(&mut self, key: String, result: &ToolExecutionResult) {
        if !self.is_enabled() || !result.success {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_soonest();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.is_enabled(),
            entries: self.entries.len(),
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn evict_soonest(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Deterministic cache key for one call.
pub fn cache_key(tool: &str, server: &str, arguments: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(arguments, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update([0u8]);
    hasher.update(server.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// JSON text with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
