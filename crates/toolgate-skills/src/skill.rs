use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use toolgate_core::{ToolCall, ToolResult, ToolgateResult};

/// Metadata describing a skill's interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait that every host tool implements, whether native or bridged from an MCP server.
#[async_trait]
pub trait Skill: Send + Sync {
    fn descriptor(&self) -> &SkillDescriptor;

    async fn execute(&self, call: ToolCall) -> ToolgateResult<ToolResult>;
}
