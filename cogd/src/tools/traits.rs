//! Tool trait and result types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::ToolContext;

/// A tool that can be called by the LLM
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches LLM tool_use name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool; errors become `ToolResult {success: false}` at the
    /// executor boundary
    async fn execute(&self, params: Value, ctx: &ToolContext) -> eyre::Result<Value>;
}

/// Structured outcome of one tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(result: Value, started_at: DateTime<Utc>) -> Self {
        let completed_at = Utc::now();
        Self {
            success: true,
            result: Some(result),
            error: None,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Create a failure result
    pub fn failure(error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        let completed_at = Utc::now();
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Serialize for embedding in a tool-result message
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"success\":false}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_result() {
        let result = ToolResult::success(json!({"time": "now"}), Utc::now());
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.result.unwrap()["time"], "now");
    }

    #[test]
    fn test_failure_result() {
        let result = ToolResult::failure("tool not found", Utc::now());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("tool not found"));
        assert!(result.result.is_none());
    }

    #[test]
    fn test_message_content_round_trips() {
        let result = ToolResult::success(json!(42), Utc::now());
        let content = result.to_message_content();
        let parsed: ToolResult = serde_json::from_str(&content).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.result.unwrap(), json!(42));
    }
}
