//! ToolExecutor - validated, time-bounded tool execution
//!
//! `execute` turns every failure mode (unknown tool, bad params, timeout,
//! execution error) into a structured `ToolResult` so the calling flow never
//! unwinds. Completion events are NOT emitted here: the caller updates the
//! owning task's context first and then calls `emit_completion`, so the FSM
//! never observes a completion before the context reflects it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::events::{Event, EventBus, EventType};
use crate::llm::ToolDefinition;

use super::context::ToolContext;
use super::schema;
use super::traits::{Tool, ToolResult};

/// Absolute cap on any per-call timeout override
pub const MAX_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Character budget for a serialized tool result before truncation
pub const DEFAULT_MAX_RESULT_CHARS: usize = 30_000;

/// Marker appended to truncated results
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Per-tool call statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolStats {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

/// Manages tool lookup and execution
pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    bus: Arc<EventBus>,
    default_timeout: Duration,
    max_result_chars: usize,
    stats: std::sync::Mutex<HashMap<String, ToolStats>>,
}

impl ToolExecutor {
    pub fn new(bus: Arc<EventBus>, default_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            bus,
            default_timeout: default_timeout.min(MAX_TOOL_TIMEOUT),
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
            stats: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Executor preloaded with the built-in tools
    pub fn with_builtins(bus: Arc<EventBus>, default_timeout: Duration) -> Self {
        let mut executor = Self::new(bus, default_timeout);
        for tool in super::builtin::all() {
            executor.add_tool(tool);
        }
        executor
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Definitions for the LLM, optionally restricted to an allowlist
    pub fn definitions_for(&self, allowed: Option<&[String]>) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| match allowed {
                Some(names) => names.iter().any(|n| n == t.name()),
                None => true,
            })
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect()
    }

    /// Execute a tool by name
    ///
    /// Emits TOOL_CALL_REQUESTED on entry. Never emits completion events.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
        timeout_override: Option<Duration>,
    ) -> ToolResult {
        let started_at = Utc::now();

        self.bus.emit(
            Event::new(EventType::ToolCallRequested, "tool-executor")
                .with_task(ctx.task_id.clone())
                .with_payload(json!({"tool": name})),
        );

        let Some(tool) = self.tools.get(name) else {
            debug!(tool = %name, "tool not found");
            return self.finish(name, ToolResult::failure(format!("Tool not found: {}", name), started_at));
        };

        if let Err(message) = schema::validate(&tool.input_schema(), &params) {
            debug!(tool = %name, %message, "tool parameter validation failed");
            return self.finish(
                name,
                ToolResult::failure(format!("Invalid parameters for {}: {}", name, message), started_at),
            );
        }

        let timeout = timeout_override.unwrap_or(self.default_timeout).min(MAX_TOOL_TIMEOUT);

        let result = match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(Ok(value)) => ToolResult::success(self.truncate_value(value), started_at),
            Ok(Err(e)) => ToolResult::failure(format!("Tool {} failed: {}", name, e), started_at),
            Err(_) => ToolResult::failure(
                format!("Tool {} timed out after {}ms", name, timeout.as_millis()),
                started_at,
            ),
        };

        self.finish(name, result)
    }

    /// Emit the completion event for an already-applied tool result
    ///
    /// Called by the agent AFTER it has appended the tool message and marked
    /// the plan step done. Ordering between completions of concurrent calls
    /// on the same task is whatever the bus's FIFO gives; no further
    /// serialization is guaranteed.
    pub fn emit_completion(&self, task_id: &str, tool_name: &str, step_index: usize, result: &ToolResult) {
        let event_type = if result.success {
            EventType::ToolCallCompleted
        } else {
            EventType::ToolCallFailed
        };
        self.bus.emit(
            Event::new(event_type, "tool-executor")
                .with_task(task_id)
                .with_payload(json!({
                    "tool": tool_name,
                    "stepIndex": step_index,
                    "success": result.success,
                    "error": result.error.clone(),
                    "durationMs": result.duration_ms,
                })),
        );
    }

    /// Statistics for one tool
    pub fn stats(&self, name: &str) -> ToolStats {
        self.stats
            .lock()
            .expect("tool stats poisoned")
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    fn finish(&self, name: &str, result: ToolResult) -> ToolResult {
        let mut stats = self.stats.lock().expect("tool stats poisoned");
        let entry = stats.entry(name.to_string()).or_default();
        entry.calls += 1;
        entry.total_duration_ms += result.duration_ms;
        if !result.success {
            entry.failures += 1;
            warn!(tool = %name, error = result.error.as_deref().unwrap_or("-"), "tool call failed");
        }
        result
    }

    /// Cap oversized results before they enter a session or task context
    fn truncate_value(&self, value: Value) -> Value {
        let serialized = value.to_string();
        if serialized.len() <= self.max_result_chars {
            return value;
        }
        let truncated: String = serialized.chars().take(self.max_result_chars).collect();
        json!({"truncated": format!("{}{}", truncated, TRUNCATION_MARKER)})
    }
}
