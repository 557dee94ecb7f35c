//! `toolgate.toml` loading.

use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use toolgate_mcp::{
    ClientOptions, ServerConfig, ServerHostConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TOOL_TIMEOUT,
};
use toolgate_security::SsrfPolicy;

/// Environment variable consulted when `[server]` sets no `auth_token`.
pub const AUTH_TOKEN_ENV: &str = "TOOLGATE_AUTH_TOKEN";

/// The whole configuration file.
#[derive(Debug, Deserialize)]
pub struct ToolgateConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub server: ServerSection,
    /// Remote MCP servers, keyed by name.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// `[client]`: how Toolgate talks to the configured servers.
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub ssrf: SsrfPolicy,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            tool_timeout_ms: default_tool_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            ssrf: SsrfPolicy::default(),
        }
    }
}

/// `[server]`: how `toolgate serve` exposes the aggregated tools.
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            auth_token: None,
            instructions: None,
        }
    }
}

fn default_tool_timeout_ms() -> u64 {
    DEFAULT_TOOL_TIMEOUT.as_millis() as u64
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_base_path() -> String {
    toolgate_mcp::DEFAULT_BASE_PATH.to_string()
}

impl ToolgateConfig {
    /// Reads and validates `path`. A token from [`AUTH_TOKEN_ENV`] fills in
    /// a missing `server.auth_token`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let env_token = std::env::var(AUTH_TOKEN_ENV).ok();
        Self::parse(&text, env_token)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// Parses config text; `env_token` is the value of [`AUTH_TOKEN_ENV`].
    pub fn parse(text: &str, env_token: Option<String>) -> anyhow::Result<Self> {
        let mut config: ToolgateConfig = toml::from_str(text)?;
        for (name, server) in &config.servers {
            server
                .validate()
                .with_context(|| format!("server '{name}'"))?;
        }
        if config.server.auth_token.is_none() {
            config.server.auth_token = env_token.filter(|t| !t.trim().is_empty());
        }
        Ok(config)
    }

    /// Options for the client manager.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            tool_timeout: Duration::from_millis(self.client.tool_timeout_ms),
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
            ssrf: self.client.ssrf.clone(),
            ..ClientOptions::default()
        }
    }

    /// Settings of the re-exporting server host.
    pub fn host_config(&self) -> ServerHostConfig {
        ServerHostConfig {
            base_path: self.server.base_path.clone(),
            auth_token: self.server.auth_token.clone(),
            instructions: self.server.instructions.clone(),
        }
    }
}
