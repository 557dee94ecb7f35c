//! Adapter that exposes remote MCP tools as host skills.

use crate::manager::ClientManager;
use crate::protocol::ToolDescriptor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::{ToolCall, ToolErrorKind, ToolResult, ToolgateError, ToolgateResult};
use toolgate_skills::{Skill, SkillDescriptor, SkillRegistry};
use tracing::debug;

/// An MCP tool wrapped as a host [`Skill`].
///
/// Calls go through the [`ClientManager`] by `server:tool`, so the bridge
/// never holds a connection of its own.
pub struct McpTool {
    descriptor: SkillDescriptor,
    server: String,
    tool: String,
    manager: Arc<ClientManager>,
    timeout: Option<Duration>,
}

impl McpTool {
    /// Overrides the manager's default tool timeout for this tool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Server exporting the tool.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Tool name on the server.
    pub fn remote_name(&self) -> &str {
        &self.tool
    }
}

/// Wraps one catalog entry. With `qualify`, the host-visible name is
/// `server:tool`; otherwise it is the bare tool name.
pub fn wrap_mcp_tool(
    descriptor: &ToolDescriptor,
    manager: Arc<ClientManager>,
    qualify: bool,
) -> McpTool {
    let name = if qualify {
        descriptor.qualified_name()
    } else {
        descriptor.name.clone()
    };
    McpTool {
        descriptor: SkillDescriptor {
            name,
            description: format!("[MCP:{}] {}", descriptor.server, descriptor.description),
            parameters_schema: descriptor.input_schema.clone(),
        },
        server: descriptor.server.clone(),
        tool: descriptor.name.clone(),
        manager,
        timeout: None,
    }
}

/// One bridged tool per catalog entry of every connected server.
///
/// Names are qualified only where two servers export the same tool name.
pub fn resolve_mcp_tools(manager: &Arc<ClientManager>) -> Vec<McpTool> {
    let tools = manager.list_all_tools();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, tool) in &tools {
        *counts.entry(tool.name.as_str()).or_default() += 1;
    }
    tools
        .iter()
        .map(|(_, tool)| {
            let qualify = counts.get(tool.name.as_str()).copied().unwrap_or_default() > 1;
            wrap_mcp_tool(tool, Arc::clone(manager), qualify)
        })
        .collect()
}

/// Registers every bridged tool in `registry`. Returns how many were added.
pub fn register_mcp_tools(manager: &Arc<ClientManager>, registry: &mut SkillRegistry) -> usize {
    let tools = resolve_mcp_tools(manager);
    let count = tools.len();
    for tool in tools {
        registry.register(Arc::new(tool));
    }
    count
}

#[async_trait]
impl Skill for McpTool {
    fn descriptor(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall) -> ToolgateResult<ToolResult> {
        let target = format!("{}:{}", self.server, self.tool);
        let outcome = self
            .manager
            .call_tool_with_timeout(&target, call.arguments, self.timeout)
            .await;

        match outcome {
            Ok(result) => {
                Ok(ToolResult::success(&call.id, result.text()).with_payload(result.payload()))
            }
            Err(e @ (ToolgateError::Connection { .. } | ToolgateError::NotConnected { .. })) => {
                debug!(server = %self.server, tool = %self.tool, error = %e, "MCP server unavailable");
                Ok(ToolResult::failed(
                    &call.id,
                    ToolErrorKind::Unavailable,
                    e.to_string(),
                ))
            }
            Err(ToolgateError::Tool {
                message,
                is_timeout: true,
                ..
            }) => Ok(ToolResult::failed(
                &call.id,
                ToolErrorKind::Timeout,
                format!("Tool '{}' timed out: {message}", self.descriptor.name),
            )),
            Err(ToolgateError::Tool { message, .. }) => Ok(ToolResult::failed(
                &call.id,
                ToolErrorKind::Execution,
                message,
            )),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ClientOptions;
    use std::collections::BTreeMap;

    fn descriptor(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server: server.into(),
            name: name.into(),
            description: "Read a file from disk".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn empty_manager() -> Arc<ClientManager> {
        Arc::new(ClientManager::new(BTreeMap::new(), ClientOptions::default()))
    }

    #[test]
    fn test_wrap_names_and_description() {
        let manager = empty_manager();
        let bare = wrap_mcp_tool(&descriptor("files", "read_file"), Arc::clone(&manager), false);
        assert_eq!(bare.descriptor().name, "read_file");
        assert_eq!(bare.descriptor().description, "[MCP:files] Read a file from disk");
        assert_eq!(bare.server(), "files");

        let qualified = wrap_mcp_tool(&descriptor("files", "read_file"), manager, true);
        assert_eq!(qualified.descriptor().name, "files:read_file");
        assert_eq!(qualified.remote_name(), "read_file");
    }

    #[tokio::test]
    async fn test_unconfigured_server_surfaces_as_error() {
        let tool = wrap_mcp_tool(&descriptor("gone", "read_file"), empty_manager(), false);
        let call = ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({}),
        };
        // Not a server problem but a lookup problem: nothing configures "gone".
        let err = tool.execute(call).await.unwrap_err();
        assert!(matches!(err, ToolgateError::UnknownTool(_)));
    }
}
