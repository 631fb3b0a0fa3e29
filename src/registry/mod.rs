//! Server registry: named MCP servers, their connection state machine,
//! retry policy, and the periodic health-check loop.

pub mod server_registry;
pub mod types;

pub use server_registry::ServerRegistry;
pub use types::{RegistryStats, ServerInfo, ServerStatus};
