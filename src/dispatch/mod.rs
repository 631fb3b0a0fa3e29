//! Unified dispatch: strategy-based server selection, result caching,
//! filtering, and batch execution over the discovered catalog.

pub mod cache;
pub mod registry;
pub mod strategy;
pub mod types;

pub use cache::{cache_key, ResultCache};
pub use registry::{ToolFilter, UnifiedToolRegistry};
pub use strategy::{SelectionStrategy, ServerSelector};
pub use types::{
    CacheStats, DispatchSettings, DispatchStats, ToolExecutionResult, ToolRequest,
    UnifiedRegistryStats,
};
