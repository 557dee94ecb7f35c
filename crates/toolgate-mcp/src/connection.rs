//! One client connection to one configured MCP server.

use crate::config::{ClientOptions, ServerConfig, TransportKind};
use crate::protocol::{
    InitializeResult, JsonRpcResponse, McpToolDef, McpToolResult, ServerInfo, ToolDescriptor,
    MCP_PROTOCOL_VERSION,
};
use crate::transport::{Connector, Transport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::{ToolgateError, ToolgateResult};
use tracing::{debug, info, warn};

/// Upper bound on `tools/list` pages followed during one catalog fetch.
const MAX_CATALOG_PAGES: usize = 100;

/// Lifecycle of a [`ClientConnection`].
///
/// `Failed` and `Closed` are terminal: a new instance is needed to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, `connect` not called yet.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Ready for tool calls.
    Connected,
    /// Connect failed or the transport went away.
    Failed,
    /// Closed by the owner.
    Closed,
}

impl ConnectionState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        })
    }
}

/// Point-in-time status of one server, as reported by the manager.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Configured server name.
    pub name: String,
    /// Transport in use.
    pub transport: TransportKind,
    /// Current state.
    pub state: ConnectionState,
    /// Number of tools in the cached catalog.
    pub tool_count: usize,
    /// When the connection reached `Connected`.
    pub connected_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_error: Option<String>,
}

struct Inner {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    tools: Vec<ToolDescriptor>,
    server_info: Option<ServerInfo>,
    connected_at: Option<DateTime<Utc>>,
    failure: Option<ToolgateError>,
}

/// A connection to one MCP server: its transport, state and tool catalog.
pub struct ClientConnection {
    name: String,
    config: ServerConfig,
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
}

impl ClientConnection {
    /// Creates an idle connection. Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        name: impl Into<String>,
        config: ServerConfig,
        options: ClientOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            options,
            connector,
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                transport: None,
                tools: Vec::new(),
                server_info: None,
                connected_at: None,
                failure: None,
            }),
        }
    }

    /// Configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration this connection was created from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Name and version reported by the server during the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.lock().server_info.clone()
    }

    /// Message of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().failure.as_ref().map(ToString::to_string)
    }

    /// The error that moved this connection to `Failed`, for callers that
    /// joined an in-flight connect.
    pub fn failure(&self) -> Option<ToolgateError> {
        self.inner
            .lock()
            .failure
            .as_ref()
            .map(|e| replicate(&self.name, e))
    }

    /// Opens the transport, performs the handshake and fetches the tool catalog.
    ///
    /// A no-op when already connected; fails on a failed or closed instance.
    pub async fn connect(&self) -> ToolgateResult<()> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Idle => inner.state = ConnectionState::Connecting,
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(ToolgateError::connection(
                        &self.name,
                        "connect already in progress",
                    ))
                }
                state @ (ConnectionState::Failed | ConnectionState::Closed) => {
                    return Err(ToolgateError::connection(
                        &self.name,
                        format!("connection is {state}; create a new instance to reconnect"),
                    ))
                }
            }
        }

        info!(server = %self.name, transport = %self.config.kind(), "Connecting to MCP server");

        let attempt = tokio::time::timeout(self.options.connect_timeout, self.establish()).await;
        let outcome = match attempt {
            Ok(result) => result,
            Err(_) => Err(ToolgateError::connection(
                &self.name,
                format!(
                    "timed out after {} ms",
                    self.options.connect_timeout.as_millis()
                ),
            )),
        };

        match outcome {
            Ok((transport, init, tools)) => {
                let closed_meanwhile = {
                    let mut inner = self.inner.lock();
                    if inner.state == ConnectionState::Closed {
                        true
                    } else {
                        inner.state = ConnectionState::Connected;
                        inner.transport = Some(Arc::clone(&transport));
                        inner.tools = tools;
                        inner.server_info = init.server_info;
                        inner.connected_at = Some(Utc::now());
                        info!(
                            server = %self.name,
                            version = %init.protocol_version,
                            tools = inner.tools.len(),
                            "MCP server connected"
                        );
                        false
                    }
                };
                if closed_meanwhile {
                    transport.close().await;
                    return Err(ToolgateError::NotConnected {
                        server: self.name.clone(),
                    });
                }
                Ok(())
            }
            Err(e) => {
                let err = normalize(&self.name, e);
                warn!(server = %self.name, error = %err, "Failed to connect to MCP server");
                let mut inner = self.inner.lock();
                if inner.state != ConnectionState::Closed {
                    inner.state = ConnectionState::Failed;
                }
                inner.failure = Some(replicate(&self.name, &err));
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
    ) -> ToolgateResult<(Arc<dyn Transport>, InitializeResult, Vec<ToolDescriptor>)> {
        let transport: Arc<dyn Transport> = Arc::from(
            self.connector
                .open(&self.name, &self.config, &self.options)
                .await?,
        );
        match self.handshake(transport.as_ref()).await {
            Ok((init, tools)) => Ok((transport, init, tools)),
            Err(e) => {
                let diagnostics = transport.diagnostics().await;
                transport.close().await;
                Err(match diagnostics {
                    Some(stderr) => ToolgateError::connection(
                        &self.name,
                        format!("{}; server stderr:\n{stderr}", describe(&e)),
                    ),
                    None => e,
                })
            }
        }
    }

    async fn handshake(
        &self,
        transport: &dyn Transport,
    ) -> ToolgateResult<(InitializeResult, Vec<ToolDescriptor>)> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            }
        });
        let result = expect_result(transport.request("initialize", Some(params)).await?)?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            ToolgateError::Protocol(format!("failed to parse initialize result: {e}"))
        })?;

        transport.notify("notifications/initialized", None).await?;

        let tools = self.fetch_catalog(transport).await?;
        Ok((init, tools))
    }

    async fn fetch_catalog(&self, transport: &dyn Transport) -> ToolgateResult<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_CATALOG_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = expect_result(transport.request("tools/list", params).await?)?;
            let defs: Vec<McpToolDef> = serde_json::from_value(
                result
                    .get("tools")
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new())),
            )
            .map_err(|e| ToolgateError::Protocol(format!("failed to parse tools: {e}")))?;
            tools.extend(defs.into_iter().map(|d| ToolDescriptor::from_def(&self.name, d)));

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
        warn!(server = %self.name, "Tool catalog truncated after {MAX_CATALOG_PAGES} pages");
        Ok(tools)
    }

    /// The cached tool catalog.
    pub fn list_tools(&self) -> ToolgateResult<Vec<ToolDescriptor>> {
        let inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return Err(ToolgateError::NotConnected {
                server: self.name.clone(),
            });
        }
        Ok(inner.tools.clone())
    }

    /// Calls `tool` with `arguments`, giving up after `timeout` (or the
    /// configured default).
    ///
    /// A timed-out request is abandoned, not cancelled: the server may still
    /// run it, and a late response is dropped.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> ToolgateResult<McpToolResult> {
        let transport = self.live_transport().await?;
        let timeout = timeout.unwrap_or(self.options.tool_timeout);
        let params = serde_json::json!({ "name": tool, "arguments": arguments });

        debug!(server = %self.name, tool = %tool, "Calling MCP tool");
        let response =
            match tokio::time::timeout(timeout, transport.request("tools/call", Some(params)))
                .await
            {
                Err(_) => {
                    warn!(server = %self.name, tool = %tool, timeout_ms = timeout.as_millis() as u64, "MCP tool call timed out");
                    return Err(ToolgateError::Tool {
                        server: self.name.clone(),
                        tool: tool.to_string(),
                        message: format!("no response within {} ms", timeout.as_millis()),
                        is_timeout: true,
                    });
                }
                Ok(Err(e)) => return Err(self.transport_failed(e).await),
                Ok(Ok(response)) => response,
            };

        let tool_error = |message: String| ToolgateError::Tool {
            server: self.name.clone(),
            tool: tool.to_string(),
            message,
            is_timeout: false,
        };

        if let Some(err) = response.error {
            return Err(tool_error(err.message));
        }
        let result: McpToolResult = match response.result {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| tool_error(format!("malformed tools/call result: {e}")))?,
            None => return Err(tool_error("empty tools/call result".to_string())),
        };
        if result.is_error {
            let text = result.text();
            return Err(tool_error(if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            }));
        }
        Ok(result)
    }

    /// Releases the transport and moves to `Closed`. Idempotent.
    pub async fn close(&self) {
        let transport = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.state = ConnectionState::Closed;
            inner.transport.take()
        };
        if let Some(transport) = transport {
            transport.close().await;
        }
        info!(server = %self.name, "MCP connection closed");
    }

    /// Status snapshot.
    pub fn status(&self) -> ServerStatus {
        let inner = self.inner.lock();
        ServerStatus {
            name: self.name.clone(),
            transport: self.config.kind(),
            state: inner.state,
            tool_count: inner.tools.len(),
            connected_at: inner.connected_at,
            last_error: inner.failure.as_ref().map(ToString::to_string),
        }
    }

    /// The transport, provided the connection is usable.
    async fn live_transport(&self) -> ToolgateResult<Arc<dyn Transport>> {
        let transport = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.transport) {
                (ConnectionState::Connected, Some(t)) => Arc::clone(t),
                _ => {
                    return Err(ToolgateError::NotConnected {
                        server: self.name.clone(),
                    })
                }
            }
        };
        if transport.is_closed() {
            return Err(self
                .transport_failed(ToolgateError::Transport("MCP server went away".into()))
                .await);
        }
        Ok(transport)
    }

    /// Marks the connection failed after a transport error and releases it.
    async fn transport_failed(&self, err: ToolgateError) -> ToolgateError {
        let err = normalize(&self.name, err);
        let transport = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connected {
                inner.state = ConnectionState::Failed;
                inner.failure = Some(replicate(&self.name, &err));
                inner.transport.take()
            } else {
                None
            }
        };
        if let Some(transport) = transport {
            warn!(server = %self.name, error = %err, "MCP server disconnected");
            transport.close().await;
        }
        err
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("name", &self.name)
            .field("transport", &self.config.kind())
            .field("state", &self.state())
            .finish()
    }
}

fn expect_result(response: JsonRpcResponse) -> ToolgateResult<Value> {
    if let Some(err) = response.error {
        return Err(ToolgateError::Protocol(format!(
            "MCP error {}: {}",
            err.code, err.message
        )));
    }
    response
        .result
        .ok_or_else(|| ToolgateError::Protocol("response carries no result".into()))
}

/// Connection-level failures keep config and SSRF errors as they are and
/// report everything else as [`ToolgateError::Connection`].
fn normalize(server: &str, err: ToolgateError) -> ToolgateError {
    match err {
        ToolgateError::Config(_)
        | ToolgateError::InvalidUrl(_)
        | ToolgateError::ForbiddenTarget { .. }
        | ToolgateError::Connection { .. } => err,
        other => ToolgateError::connection(server, describe(&other)),
    }
}

fn describe(err: &ToolgateError) -> String {
    match err {
        ToolgateError::Connection { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Copies a normalized error; every other variant becomes a connection error.
fn replicate(server: &str, err: &ToolgateError) -> ToolgateError {
    match err {
        ToolgateError::Config(m) => ToolgateError::Config(m.clone()),
        ToolgateError::InvalidUrl(m) => ToolgateError::InvalidUrl(m.clone()),
        ToolgateError::ForbiddenTarget { host, reason } => ToolgateError::ForbiddenTarget {
            host: host.clone(),
            reason: reason.clone(),
        },
        other => ToolgateError::connection(server, describe(other)),
    }
}
