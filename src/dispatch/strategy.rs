//! Server selection when a tool is hosted by more than one server.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::discovery::CallTarget;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Always the first host in registration order.
    #[default]
    FirstAvailable,
    /// Rotate through hosts, one cursor per tool name.
    RoundRobin,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStrategy::FirstAvailable => write!(f, "first_available"),
            SelectionStrategy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// Applies a [`SelectionStrategy`], keeping round-robin cursors.
#[derive(Debug, Default)]
pub struct ServerSelector {
    strategy: SelectionStrategy,
    cursors: HashMap<String, usize>,
}

impl ServerSelector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            cursors: HashMap::new(),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Switch policy. Round-robin cursors are kept so switching back resumes.
    pub fn set_strategy(&mut self, strategy: SelectionStrategy) {
        self.strategy = strategy;
    }

    /// Pick one of `targets` for `tool`. `None` only if `targets` is empty.
    pub fn select<'a>(&mut self, tool: &str, targets: &'a [CallTarget]) -> Option<&'a CallTarget> {
        if targets.is_empty() {
            return None;
        }
        match self.strategy {
            SelectionStrategy::FirstAvailable => targets.first(),
            SelectionStrategy::RoundRobin => {
                let cursor = self.cursors.entry(tool.to_string()).or_insert(0);
                // The host set can shrink between calls.
                let index = *cursor % targets.len();
                *cursor = (index + 1) % targets.len();
                targets.get(index)
            }
        }
    }
}
