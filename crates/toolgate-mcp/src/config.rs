//! Configuration of remote MCP servers and client-side tuning.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use toolgate_core::{ToolgateError, ToolgateResult};
use toolgate_security::SsrfPolicy;

/// Default upper bound for a single `tools/call`.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default upper bound for transport setup, handshake and catalog fetch.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to reach one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerConfig {
    /// A local subprocess speaking newline-delimited JSON-RPC on stdin/stdout.
    Stdio {
        /// Executable to spawn.
        command: String,
        /// Arguments passed to the executable.
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment variables for the child.
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// A remote server using the legacy HTTP+SSE transport.
    Sse {
        /// URL of the event stream.
        url: String,
        /// Headers added to every request.
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// A remote server using the streamable HTTP transport.
    Http {
        /// URL of the MCP endpoint.
        url: String,
        /// Headers added to every request.
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl ServerConfig {
    /// Parses one server entry, reporting any problem as a config error.
    pub fn from_value(value: serde_json::Value) -> ToolgateResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| ToolgateError::Config(format!("invalid MCP server entry: {e}")))
    }

    /// The transport this entry selects.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Sse { .. } => TransportKind::Sse,
            Self::Http { .. } => TransportKind::Http,
        }
    }

    /// Checks required fields. Runs before any process or network activity.
    pub fn validate(&self) -> ToolgateResult<()> {
        match self {
            Self::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ToolgateError::Config(
                        "stdio server requires a non-empty 'command'".into(),
                    ));
                }
            }
            Self::Sse { url, headers } | Self::Http { url, headers } => {
                if url.trim().is_empty() {
                    return Err(ToolgateError::Config(format!(
                        "{} server requires a non-empty 'url'",
                        self.kind()
                    )));
                }
                header_map(headers)?;
            }
        }
        Ok(())
    }
}

/// Converts configured static headers into a [`HeaderMap`].
pub fn header_map(headers: &BTreeMap<String, String>) -> ToolgateResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ToolgateError::Config(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| {
                ToolgateError::Config(format!("invalid value for header '{}'", name.as_str()))
            })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Transport selected by a [`ServerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process over stdin/stdout.
    Stdio,
    /// Legacy HTTP+SSE.
    Sse,
    /// Streamable HTTP.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
        })
    }
}

/// Client-side settings shared by every connection of a manager.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Default timeout of one tool call.
    pub tool_timeout: Duration,
    /// Timeout of the whole connect sequence.
    pub connect_timeout: Duration,
    /// SSRF policy applied to `sse` and `http` servers.
    pub ssrf: SsrfPolicy,
    /// Name sent as `clientInfo.name`.
    pub client_name: String,
    /// Version sent as `clientInfo.version`.
    pub client_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ssrf: SsrfPolicy::default(),
            client_name: "toolgate".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
