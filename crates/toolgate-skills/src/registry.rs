use crate::skill::{Skill, SkillDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use toolgate_core::{ToolCall, ToolResult, ToolgateError, ToolgateResult};
use tracing::{info, warn};

/// Central registry for all tools the host can invoke.
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Register a skill, replacing any previous skill with the same name.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.descriptor().name.clone();
        if self.skills.insert(name.clone(), skill).is_some() {
            warn!(skill = %name, "Replaced previously registered skill");
        } else {
            info!(skill = %name, "Registered skill");
        }
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.skills.get(name)
    }

    /// Descriptors of all registered skills, ordered by name.
    pub fn list_descriptors(&self) -> Vec<&SkillDescriptor> {
        let mut descriptors: Vec<_> = self.skills.values().map(|s| s.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Execute a tool call against the skill registered under `call.name`.
    pub async fn execute(&self, call: ToolCall) -> ToolgateResult<ToolResult> {
        let skill = self
            .skills
            .get(&call.name)
            .ok_or_else(|| ToolgateError::UnknownTool(call.name.clone()))?;

        skill.execute(call).await
    }

    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo {
        descriptor: SkillDescriptor,
    }

    impl Echo {
        fn named(name: &str) -> Arc<dyn Skill> {
            Arc::new(Self {
                descriptor: SkillDescriptor {
                    name: name.to_string(),
                    description: "Echo the arguments back".to_string(),
                    parameters_schema: serde_json::json!({"type": "object"}),
                },
            })
        }
    }

    #[async_trait]
    impl Skill for Echo {
        fn descriptor(&self) -> &SkillDescriptor {
            &self.descriptor
        }

        async fn execute(&self, call: ToolCall) -> ToolgateResult<ToolResult> {
            Ok(ToolResult::success(&call.id, call.arguments.to_string()))
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "c1".to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({"x": 1}),
        }
    }

    #[tokio::test]
    async fn test_execute_registered_skill() {
        let mut registry = SkillRegistry::new();
        registry.register(Echo::named("echo"));
        let result = registry.execute(call("echo")).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_execute_unknown_skill() {
        let registry = SkillRegistry::new();
        let err = registry.execute(call("missing")).await.unwrap_err();
        assert!(matches!(err, ToolgateError::UnknownTool(name) if name == "missing"));
    }

    #[test]
    fn test_descriptors_sorted_and_replace() {
        let mut registry = SkillRegistry::new();
        registry.register(Echo::named("zeta"));
        registry.register(Echo::named("alpha"));
        registry.register(Echo::named("alpha"));
        assert_eq!(registry.skill_count(), 2);
        let names: Vec<_> = registry
            .list_descriptors()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert!(registry.unregister("zeta").is_some());
        assert!(registry.get("zeta").is_none());
    }
}
