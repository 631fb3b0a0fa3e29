//! MCP Client: one connection to one MCP server.
//!
//! This module handles:
//! - JSON-RPC 2.0 transports: child-process stdio and HTTP with SSE replies
//! - Spawning and terminating stdio server processes
//! - The initialize handshake and capability enumeration
//! - Tool, resource, and prompt invocation with per-server timeouts
//!
//! The server registry owns one [`McpClient`] per connected server; the
//! dispatch layer reaches servers only through it.

pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::McpClient;
pub use errors::{ErrorKind, McpError};
pub use session::{DefaultSessionFactory, Session, SessionFactory};
pub use types::{
    Capabilities, McpPromptDefinition, McpResourceDefinition, McpToolDefinition, ServerConfig,
    ServerIdentity, TransportKind,
};
