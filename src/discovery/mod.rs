//! Capability discovery: enumerates tools, resources, and prompts across
//! connected servers and maintains the unified catalog.

pub mod catalog;
pub mod engine;
pub mod types;

pub use catalog::CapabilityCatalog;
pub use engine::{DiscoveryEngine, DiscoverySettings};
pub use types::{
    AvailabilityStatus, CallTarget, CapabilitySummary, DiscoveryResult, PromptInfo, ResourceInfo,
    ToolConflict, ToolInfo,
};
