//! Subagent definitions - per-task-type tool gating
//!
//! A subagent binds a task type to a tool allowlist and a scoped system
//! prompt, selected at submit time. The allowlist scopes both what the
//! Thinker advertises and what the actor is permitted to invoke; a tool
//! request outside the list is rejected with a synthetic failure, which is
//! the prompt-injection safety net.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The task type used when submit does not name one
pub const DEFAULT_TASK_TYPE: &str = "general";

/// Registration priority for built-in definitions; user definitions register
/// higher and override
pub const BUILTIN_PRIORITY: u8 = 0;
pub const USER_PRIORITY: u8 = 10;

/// One task-type definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentDef {
    #[serde(rename = "taskType")]
    pub task_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "systemPrompt", default)]
    pub system_prompt: String,
    /// Allowed tool names; None means every registered tool
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

impl SubagentDef {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            description: String::new(),
            system_prompt: String::new(),
            tools: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Registry of task-type definitions
pub struct SubagentRegistry {
    defs: HashMap<String, (u8, SubagentDef)>,
}

impl SubagentRegistry {
    /// Registry holding only the built-in general type
    pub fn with_builtins() -> Self {
        let mut registry = Self { defs: HashMap::new() };
        registry.register_all(
            vec![SubagentDef::new(DEFAULT_TASK_TYPE).with_system_prompt("You are a general-purpose task worker.")],
            BUILTIN_PRIORITY,
        );
        registry
    }

    /// Register many definitions under one priority key
    ///
    /// Equal-or-higher priority replaces; lower is ignored. This is what
    /// makes user definitions override built-ins deterministically no matter
    /// the registration order.
    pub fn register_all(&mut self, defs: Vec<SubagentDef>, priority: u8) {
        for def in defs {
            match self.defs.get(&def.task_type) {
                Some((existing, _)) if *existing > priority => {
                    debug!(task_type = %def.task_type, "keeping higher-priority subagent definition");
                }
                _ => {
                    debug!(task_type = %def.task_type, priority, "registering subagent definition");
                    self.defs.insert(def.task_type.clone(), (priority, def));
                }
            }
        }
    }

    pub fn get(&self, task_type: &str) -> Option<&SubagentDef> {
        self.defs.get(task_type).map(|(_, def)| def)
    }

    /// Tool allowlist for a type; None means unrestricted
    pub fn allowed_tools(&self, task_type: &str) -> Option<Vec<String>> {
        self.get(task_type).and_then(|def| def.tools.clone())
    }

    /// Whether a type may invoke a tool; unknown types are unrestricted
    pub fn is_tool_allowed(&self, task_type: &str, tool: &str) -> bool {
        match self.get(task_type).and_then(|def| def.tools.as_ref()) {
            Some(allowed) => allowed.iter().any(|t| t == tool),
            None => true,
        }
    }

    pub fn task_types(&self) -> Vec<String> {
        self.defs.keys().cloned().collect()
    }
}

impl Default for SubagentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_general_unrestricted() {
        let registry = SubagentRegistry::with_builtins();
        assert!(registry.get(DEFAULT_TASK_TYPE).is_some());
        assert!(registry.is_tool_allowed(DEFAULT_TASK_TYPE, "anything"));
        assert!(registry.allowed_tools(DEFAULT_TASK_TYPE).is_none());
    }

    #[test]
    fn test_allowlist_gating() {
        let mut registry = SubagentRegistry::with_builtins();
        registry.register_all(
            vec![SubagentDef::new("clock").with_tools(vec!["current_time".to_string()])],
            USER_PRIORITY,
        );

        assert!(registry.is_tool_allowed("clock", "current_time"));
        assert!(!registry.is_tool_allowed("clock", "echo"));
        assert_eq!(registry.allowed_tools("clock").unwrap(), vec!["current_time"]);
    }

    #[test]
    fn test_unknown_type_unrestricted() {
        let registry = SubagentRegistry::with_builtins();
        assert!(registry.is_tool_allowed("never-registered", "echo"));
    }

    #[test]
    fn test_user_overrides_builtin_regardless_of_order() {
        let mut registry = SubagentRegistry::with_builtins();

        // User registers first...
        registry.register_all(
            vec![SubagentDef::new("general").with_tools(vec!["echo".to_string()])],
            USER_PRIORITY,
        );
        // ...then a late builtin registration must NOT override it
        registry.register_all(vec![SubagentDef::new("general")], BUILTIN_PRIORITY);

        assert_eq!(registry.allowed_tools("general").unwrap(), vec!["echo"]);
    }
}
