//! Security primitives for Toolgate.
//!
//! Provides the SSRF guard used for every outbound request to a remote MCP
//! server, and the timing-safe bearer-token check used when Toolgate itself
//! acts as an MCP server.
//!
//! # Main types
//!
//! - [`SsrfPolicy`] - Which non-public targets, if any, may be reached.
//! - [`SecureUrl`] - A URL that passed [`validate_url`].
//! - [`GuardedClient`] - HTTP client that re-validates every redirect hop.
//! - [`verify_bearer`] - Constant-time `Authorization: Bearer` check.

/// Bearer-token verification.
pub mod bearer;
/// URL validation and the redirect-checking HTTP client.
pub mod ssrf;

pub use bearer::{constant_time_eq, extract_bearer, verify_bearer};
pub use ssrf::{redact_url, validate_url, GuardedClient, GuardedRequest, GuardedResolver, SecureUrl, SsrfPolicy};
