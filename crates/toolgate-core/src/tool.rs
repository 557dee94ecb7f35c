//! Tool call and result types.

use serde::{Deserialize, Serialize};

/// A request from the host agent to invoke a specific tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the caller for this tool call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// Classification of a failed [`ToolResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The backing server is unreachable or disconnected.
    Unavailable,
    /// The call did not complete within its timeout.
    Timeout,
    /// The tool ran and reported a failure.
    Execution,
}

impl ToolErrorKind {
    /// Whether the caller may retry the same call later.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// The textual output produced by the tool.
    pub content: String,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
    /// Set when `is_error` is true and the failure has a known class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    /// Structured output passed through from a remote tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            error_kind: None,
            payload: None,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
            error_kind: None,
            payload: None,
        }
    }

    /// Creates an error tool result with an explicit classification.
    pub fn failed(
        call_id: impl Into<String>,
        kind: ToolErrorKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            error_kind: Some(kind),
            ..Self::error(call_id, content)
        }
    }

    /// Attaches a structured payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Whether this is a failure the caller may retry.
    pub fn is_retryable(&self) -> bool {
        self.error_kind.is_some_and(ToolErrorKind::is_retryable)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_success() {
        let result = ToolResult::success("call_1", "output");
        assert!(!result.is_error);
        assert_eq!(result.content, "output");
        assert!(!result.is_retryable());
    }

    #[test]
    fn test_tool_result_failed_kinds() {
        let timeout = ToolResult::failed("c", ToolErrorKind::Timeout, "slow");
        assert!(timeout.is_error);
        assert!(timeout.is_retryable());

        let exec = ToolResult::failed("c", ToolErrorKind::Execution, "boom");
        assert!(exec.is_error);
        assert!(!exec.is_retryable());
    }

    #[test]
    fn test_tool_result_omits_empty_optionals() {
        let json = serde_json::to_value(ToolResult::success("c", "ok")).unwrap();
        assert!(json.get("error_kind").is_none());
        assert!(json.get("payload").is_none());

        let json = serde_json::to_value(
            ToolResult::failed("c", ToolErrorKind::Unavailable, "down")
                .with_payload(serde_json::json!({"a": 1})),
        )
        .unwrap();
        assert_eq!(json["error_kind"], "unavailable");
        assert_eq!(json["payload"]["a"], 1);
    }
}
