//! MCP server host: answers `initialize`, `ping`, `tools/list` and
//! `tools/call` from a [`SkillRegistry`].
//!
//! The host never binds a socket. HTTP mounting lives in the gateway crate;
//! [`McpServer::serve_io`] covers stdio.

use crate::protocol::{
    Incoming, JsonRpcError, JsonRpcResponse, McpToolDef, McpToolResult, ServerInfo,
    INVALID_PARAMS, INVALID_REQUEST, MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use toolgate_core::{ToolCall, ToolgateError, ToolgateResult};
use toolgate_security::verify_bearer;
use toolgate_skills::SkillRegistry;
use tracing::{debug, info, warn};

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "toolgate";

/// Default mount point of the HTTP endpoints.
pub const DEFAULT_BASE_PATH: &str = "/mcp";

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

/// Settings of the server host.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerHostConfig {
    /// Path the HTTP endpoints are mounted under.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Bearer token required on inbound requests; `None` disables the check.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Usage hints returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerHostConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            auth_token: None,
            instructions: None,
        }
    }
}

/// Checks the `Authorization` header of an inbound request against
/// `expected_token`. Never panics; any malformed input yields `false`.
pub fn authenticate_mcp_request(headers: &HeaderMap, expected_token: &str) -> bool {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    verify_bearer(header, expected_token)
}

/// Protocol server backed by the host's tool registry.
pub struct McpServer {
    config: ServerHostConfig,
    skills: Arc<SkillRegistry>,
    calls: AtomicU64,
}

impl McpServer {
    /// Creates the server. No listener is opened.
    pub fn new(config: ServerHostConfig, skills: Arc<SkillRegistry>) -> Self {
        Self {
            config,
            skills,
            calls: AtomicU64::new(0),
        }
    }

    /// The configuration this server was built with.
    pub fn config(&self) -> &ServerHostConfig {
        &self.config
    }

    /// The tools being served.
    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    /// Identification sent in `initialize`.
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Whether an inbound request may proceed. Always true without a token.
    pub fn authenticate(&self, headers: &HeaderMap) -> bool {
        match self.config.auth_token.as_deref() {
            Some(token) => authenticate_mcp_request(headers, token),
            None => true,
        }
    }

    /// Handles one decoded JSON-RPC message or batch.
    ///
    /// Returns the reply, or `None` when nothing needs to be sent back
    /// (notifications and responses).
    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        match message {
            Value::Array(batch) => {
                if batch.is_empty() {
                    return Some(error_reply(Value::Null, INVALID_REQUEST, "empty batch"));
                }
                let mut replies = Vec::new();
                for item in batch {
                    if let Some(reply) = self.handle_single(item).await {
                        replies.push(reply);
                    }
                }
                if replies.is_empty() {
                    None
                } else {
                    Some(Value::Array(replies))
                }
            }
            single => self.handle_single(single).await,
        }
    }

    /// Handles one line or body of JSON text.
    pub async fn handle_text(&self, text: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(error_reply(Value::Null, PARSE_ERROR, &format!("Parse error: {e}"))),
        }
    }

    async fn handle_single(&self, message: Value) -> Option<Value> {
        let incoming = match Incoming::classify(message) {
            Ok(incoming) => incoming,
            Err(e) => return Some(error_reply(Value::Null, INVALID_REQUEST, &e)),
        };
        match incoming {
            Incoming::Request { id, method, params } => {
                let response = match self.dispatch(&method, params).await {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(error) => JsonRpcResponse::failure(id, error),
                };
                serde_json::to_value(response).ok()
            }
            Incoming::Notification { method, .. } => {
                debug!(method = %method, "MCP notification received");
                None
            }
            Incoming::Response(_) => {
                debug!("Ignoring unsolicited JSON-RPC response");
                None
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => Ok(self.initialize(params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(params).await,
            other => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let version = match requested {
            Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => v,
            _ => MCP_PROTOCOL_VERSION,
        };
        let client = params
            .and_then(|p| p.pointer("/clientInfo/name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(client = %client, version = %version, "MCP client initialized");

        let mut result = json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": self.server_info(),
        });
        if let Some(instructions) = &self.config.instructions {
            result["instructions"] = json!(instructions);
        }
        result
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<McpToolDef> = self
            .skills
            .list_descriptors()
            .into_iter()
            .map(|d| McpToolDef {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.parameters_schema.clone(),
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.unwrap_or_default();
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "tools/call requires a 'name'"))?
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let call = ToolCall {
            id: format!("mcp-{n}"),
            name: name.clone(),
            arguments,
        };
        debug!(tool = %name, call_id = %call.id, "Serving MCP tool call");

        let result = match self.skills.execute(call).await {
            Ok(result) => {
                let mut out = McpToolResult::from_text(result.content, result.is_error);
                out.structured_content = result.payload.filter(Value::is_object);
                out
            }
            Err(ToolgateError::UnknownTool(_)) => {
                return Err(JsonRpcError::new(
                    INVALID_PARAMS,
                    format!("Unknown tool: {name}"),
                ))
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool failed while serving MCP call");
                McpToolResult::from_text(e.to_string(), true)
            }
        };
        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(crate::protocol::INTERNAL_ERROR, e.to_string()))
    }

    /// Serves newline-delimited JSON-RPC until `reader` reaches end of input.
    ///
    /// Requests are handled concurrently; replies are written whole, one per
    /// line, in completion order.
    pub async fn serve_io<R, W>(self: Arc<Self>, reader: R, writer: W) -> ToolgateResult<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));
        let mut lines = BufReader::new(reader).lines();
        let mut handlers = tokio::task::JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let server = Arc::clone(&self);
            let writer = Arc::clone(&writer);
            handlers.spawn(async move {
                if let Some(reply) = server.handle_text(&line).await {
                    let mut bytes = serde_json::to_vec(&reply)?;
                    bytes.push(b'\n');
                    let mut writer = writer.lock().await;
                    writer.write_all(&bytes).await?;
                    writer.flush().await?;
                }
                Ok::<_, ToolgateError>(())
            });
            // Reap finished handlers so the set does not grow without bound.
            while let Some(done) = handlers.try_join_next() {
                log_handler_outcome(done);
            }
        }

        while let Some(done) = handlers.join_next().await {
            log_handler_outcome(done);
        }
        debug!("MCP stdio input closed");
        Ok(())
    }
}

fn log_handler_outcome(outcome: Result<ToolgateResult<()>, tokio::task::JoinError>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to write MCP reply"),
        Err(e) => warn!(error = %e, "MCP request handler panicked"),
    }
}

fn error_reply(id: Value, code: i64, message: &str) -> Value {
    serde_json::to_value(JsonRpcResponse::failure(id, JsonRpcError::new(code, message)))
        .unwrap_or_default()
}
