//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision requested by the client during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol revisions the server host accepts from a client.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlation id, unique per transport.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request with the given id.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Id of the request this answers; `null` when the request id was unreadable.
    #[serde(default)]
    pub id: Value,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

impl JsonRpcResponse {
    /// A successful response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// The id as an integer, if the peer echoed one back.
    pub fn numeric_id(&self) -> Option<u64> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            // Some servers stringify ids.
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Creates an error object without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A decoded inbound JSON-RPC message.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// A response to one of our requests.
    Response(JsonRpcResponse),
    /// A request initiated by the peer.
    Request {
        /// Peer-chosen id, echoed verbatim in the reply.
        id: Value,
        /// Method name.
        method: String,
        /// Parameters.
        params: Option<Value>,
    },
    /// A notification from the peer.
    Notification {
        /// Method name.
        method: String,
        /// Parameters.
        params: Option<Value>,
    },
}

impl Incoming {
    /// Classifies a parsed JSON value.
    pub fn classify(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("JSON-RPC message must be an object".to_string());
        };
        match map.remove("method") {
            Some(Value::String(method)) => {
                let params = map.remove("params");
                match map.remove("id") {
                    Some(id) if !id.is_null() => Ok(Self::Request { id, method, params }),
                    _ => Ok(Self::Notification { method, params }),
                }
            }
            Some(_) => Err("JSON-RPC method must be a string".to_string()),
            None => serde_json::from_value(Value::Object(map))
                .map(Self::Response)
                .map_err(|e| format!("malformed JSON-RPC response: {e}")),
        }
    }

    /// Parses and classifies one line or body of JSON text.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| format!("invalid JSON from peer: {e}"))?;
        Self::classify(value)
    }
}

/// MCP tool definition as carried by `tools/list`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpToolDef {
    /// Tool name, unique within one server.
    pub name: String,
    /// Description shown to the model.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A tool exported by a connected server, captured when its catalog was fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    /// Configured name of the server exporting the tool.
    pub server: String,
    /// Tool name as known to that server.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema of the arguments.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Snapshot of a wire definition for `server`.
    pub fn from_def(server: &str, def: McpToolDef) -> Self {
        Self {
            server: server.to_string(),
            name: def.name,
            description: def.description,
            input_schema: def.input_schema,
        }
    }

    /// The `server:tool` composite key.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.server, self.name)
    }
}

/// MCP tool call result from the `tools/call` response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpToolResult {
    /// Content blocks.
    #[serde(default)]
    pub content: Vec<McpContent>,
    /// Set when the tool itself reported a failure.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    /// Structured output, when the tool declares one.
    #[serde(
        default,
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
}

impl McpToolResult {
    /// A result carrying a single text block.
    pub fn from_text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![McpContent::text(text)],
            is_error,
            structured_content: None,
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The raw result for structured consumers: `structuredContent` when the
    /// server sent one, the content blocks otherwise.
    pub fn payload(&self) -> Value {
        match &self.structured_content {
            Some(structured) => structured.clone(),
            None => serde_json::json!({
                "content": serde_json::to_value(&self.content).unwrap_or_default()
            }),
        }
    }
}

/// MCP content block. Non-text blocks keep their extra fields untouched.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct McpContent {
    /// Block type (`text`, `image`, `resource`, ...).
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text of a `text` block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Any other fields of the block.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl McpContent {
    /// A `text` block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".to_string(),
            text: Some(text.into()),
            extra: serde_json::Map::new(),
        }
    }
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerCapabilities {
    /// Present when the server exposes tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Present when the server exposes resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Present when the server exposes prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitializeResult {
    /// Protocol revision chosen by the server.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identification.
    #[serde(default, rename = "serverInfo", skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// Free-form usage hints for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Name and version a server reports about itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    #[serde(default)]
    pub version: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "test/method", Some(json!({"key": "value"})));
        let parsed = serde_json::to_value(&req).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["method"], "test/method");
        assert_eq!(parsed["params"]["key"], "value");

        let bare = serde_json::to_value(JsonRpcRequest::new(2, "tools/list", None)).unwrap();
        assert!(bare.get("params").is_none());
    }

    #[test]
    fn test_classify_response_request_notification() {
        let resp = Incoming::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#).unwrap();
        match resp {
            Incoming::Response(r) => {
                assert_eq!(r.numeric_id(), Some(7));
                assert!(r.result.is_some());
            }
            other => panic!("expected response, got {other:?}"),
        }

        let req = Incoming::parse(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#).unwrap();
        assert!(matches!(req, Incoming::Request { ref method, .. } if method == "ping"));

        let note =
            Incoming::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(note, Incoming::Notification { .. }));

        assert!(Incoming::parse("[1,2]").is_err());
        assert!(Incoming::parse("not json").is_err());
    }

    #[test]
    fn test_json_rpc_error_parse() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid request"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, INVALID_REQUEST);
        assert_eq!(err.message, "Invalid request");
    }

    #[test]
    fn test_string_ids_are_numeric_when_possible() {
        let resp = JsonRpcResponse::success(json!("12"), json!({}));
        assert_eq!(resp.numeric_id(), Some(12));
        let resp = JsonRpcResponse::success(Value::Null, json!({}));
        assert_eq!(resp.numeric_id(), None);
    }

    #[test]
    fn test_tool_def_defaults_schema() {
        let tool: McpToolDef = serde_json::from_str(r#"{"name":"read_file"}"#).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        let desc = ToolDescriptor::from_def("files", tool);
        assert_eq!(desc.qualified_name(), "files:read_file");
    }

    #[test]
    fn test_tool_result_text_and_payload() {
        let json = r#"{"content":[{"type":"text","text":"line one"},{"type":"image","data":"AAA","mimeType":"image/png"},{"type":"text","text":"line two"}]}"#;
        let result: McpToolResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "line one\nline two");
        assert_eq!(result.content[1].extra["mimeType"], "image/png");
        assert_eq!(result.payload()["content"][1]["data"], "AAA");

        let structured: McpToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "{}"}],
            "structuredContent": {"size": 3}
        }))
        .unwrap();
        assert_eq!(structured.payload(), json!({"size": 3}));
    }

    #[test]
    fn test_initialize_result_parse() {
        let json = r#"{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"test-server","version":"1.0"}}"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert!(result.capabilities.tools.is_some());
        assert_eq!(result.server_info.unwrap().name, "test-server");
    }
}
