//! Execution context handed to tools

/// Identifies the task a tool call runs on behalf of
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub task_id: String,
    pub task_type: String,
    pub source: String,
}

impl ToolContext {
    pub fn new(task_id: impl Into<String>, task_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            source: source.into(),
        }
    }
}
