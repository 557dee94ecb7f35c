//! HTTP mount for the Toolgate MCP server host.
//!
//! Exposes the host's skills to remote MCP clients over streamable HTTP
//! (`POST`/`DELETE` on the base path) and the legacy SSE transport
//! (`GET {base}/sse` plus `POST {base}/messages`). Bearer-token checks are
//! applied by [`auth_middleware`]; `/health` stays open.

pub mod middleware;
pub mod server;
pub mod sessions;

pub use middleware::auth_middleware;
pub use server::{AppState, GatewayServer};
pub use sessions::SessionRegistry;
