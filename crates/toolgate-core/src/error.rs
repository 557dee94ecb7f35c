//! Error types for Toolgate.

/// Top-level error type for Toolgate.
///
/// The variants follow the layer that raised them: configuration, the SSRF
/// guard, the connection to a tool server, or the tool call itself.
#[derive(Debug, thiserror::Error)]
pub enum ToolgateError {
    /// Malformed or incomplete configuration. Never retried automatically.
    #[error("Config error: {0}")]
    Config(String),

    /// A URL that could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A URL whose target is not allowed by the SSRF policy.
    #[error("Forbidden target '{host}': {reason}")]
    ForbiddenTarget {
        /// Host (or resolved address) that was rejected.
        host: String,
        /// Why the target was rejected.
        reason: String,
    },

    /// Transport construction, handshake or mid-session disconnect.
    #[error("Connection to MCP server '{server}' failed: {message}")]
    Connection {
        /// Configured server name.
        server: String,
        /// Underlying cause.
        message: String,
    },

    /// The connection is not in the `connected` state.
    #[error("MCP server '{server}' is not connected")]
    NotConnected {
        /// Configured server name.
        server: String,
    },

    /// A tool call failed or timed out.
    #[error("Tool '{tool}' on MCP server '{server}' failed: {message}")]
    Tool {
        /// Configured server name.
        server: String,
        /// Remote tool name.
        tool: String,
        /// Server-reported message, or a timeout description.
        message: String,
        /// Whether the call was abandoned because it exceeded its timeout.
        is_timeout: bool,
    },

    /// No connected server exports the requested tool.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A bare tool name is exported by more than one server.
    #[error("Tool '{tool}' is exported by several servers ({}), qualify it as <server>:{tool}", .servers.join(", "))]
    AmbiguousTool {
        /// Bare tool name.
        tool: String,
        /// Servers exporting it.
        servers: Vec<String>,
    },

    /// Failure of the underlying byte stream or HTTP exchange.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A peer sent something that is not valid protocol data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An error raised by a host skill during invocation.
    #[error("Skill error: {0}")]
    Skill(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolgateError {
    /// Builds a [`ToolgateError::Connection`] for `server`.
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Returns true for a tool call that was abandoned on timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Tool { is_timeout: true, .. })
    }

    /// Returns true when a caller may reasonably retry later.
    ///
    /// Connection problems and timeouts are transient; configuration, SSRF
    /// rejections and tool execution failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::NotConnected { .. } | Self::Transport(_) => true,
            Self::Tool { is_timeout, .. } => *is_timeout,
            _ => false,
        }
    }
}

/// A convenience `Result` alias using [`ToolgateError`].
pub type ToolgateResult<T> = Result<T, ToolgateError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = ToolgateError::Tool {
            server: "s".into(),
            tool: "t".into(),
            message: "timed out".into(),
            is_timeout: true,
        };
        assert!(timeout.is_timeout());
        assert!(timeout.is_retryable());

        let failed = ToolgateError::Tool {
            server: "s".into(),
            tool: "t".into(),
            message: "bad input".into(),
            is_timeout: false,
        };
        assert!(!failed.is_timeout());
        assert!(!failed.is_retryable());

        assert!(ToolgateError::connection("s", "refused").is_retryable());
        assert!(!ToolgateError::Config("missing command".into()).is_retryable());
        assert!(!ToolgateError::ForbiddenTarget {
            host: "10.0.0.1".into(),
            reason: "private".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_ambiguous_tool_message_lists_servers() {
        let err = ToolgateError::AmbiguousTool {
            tool: "search".into(),
            servers: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a, b"));
        assert!(msg.contains("<server>:search"));
    }
}
