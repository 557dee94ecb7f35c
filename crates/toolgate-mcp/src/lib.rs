//! MCP client and server plumbing for Toolgate.
//!
//! The client side turns a set of [`ServerConfig`] entries into live
//! connections ([`ClientManager`]), and bridges the tools they export into the
//! host's [`SkillRegistry`](toolgate_skills::SkillRegistry). The server side
//! ([`McpServer`]) exposes a registry to MCP clients over any transport the
//! caller mounts it on.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod transport;

pub use bridge::{register_mcp_tools, resolve_mcp_tools, wrap_mcp_tool, McpTool};
pub use config::{
    ClientOptions, ServerConfig, TransportKind, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TOOL_TIMEOUT,
};
pub use connection::{ClientConnection, ConnectionState, ServerStatus};
pub use manager::ClientManager;
pub use protocol::{McpToolResult, ToolDescriptor, MCP_PROTOCOL_VERSION};
pub use server::{
    authenticate_mcp_request, McpServer, ServerHostConfig, DEFAULT_BASE_PATH, SERVER_NAME,
};
pub use transport::{create_transport, Connector, DefaultConnector, Transport};
