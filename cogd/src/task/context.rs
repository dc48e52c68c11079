//! TaskContext - the mutable working state of one task
//!
//! Each task owns exactly one context; nothing else aliases it. The agent
//! mutates it under the registry lock, the persister reads it to compute
//! deltas, and replay reconstructs it from the JSONL log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ChatMessage;

/// What a plan step does when acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Invoke a registered tool
    ToolCall,
    /// Produce the task's textual response
    Respond,
    /// Placeholder step recorded but not executed
    Stub,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolCall => write!(f, "tool_call"),
            Self::Respond => write!(f, "respond"),
            Self::Stub => write!(f, "stub"),
        }
    }
}

/// One step of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub index: usize,
    pub description: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub action_params: Value,
    #[serde(default)]
    pub completed: bool,
}

/// The planner's output for one reasoning round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub goal: String,
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// First step not yet completed
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| !s.completed)
    }

    /// True once every step is completed
    pub fn all_steps_complete(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    /// True if any step invokes a tool
    pub fn has_tool_call(&self) -> bool {
        self.steps.iter().any(|s| s.action_type == ActionType::ToolCall)
    }
}

/// Record of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub step_index: usize,
    pub action_type: ActionType,
    pub description: String,
    pub result: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Mutable working state of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub id: String,
    pub input_text: String,
    #[serde(default)]
    pub input_metadata: Value,
    pub source: String,
    pub task_type: String,
    pub description: String,

    /// Full conversation history, preserved across resumes
    pub messages: Vec<ChatMessage>,

    /// Latest structured Thinker output (opaque)
    #[serde(default)]
    pub reasoning: Value,

    pub plan: Option<Plan>,

    /// Ordered record of executed steps
    pub actions_done: Vec<ActionRecord>,

    pub reflections: Vec<Value>,
    pub post_reflection: Option<Value>,

    /// Count of Thinker invocations for this task
    pub iteration: u32,

    pub final_result: Option<Value>,
    pub error: Option<String>,

    /// State this task was suspended from, if suspended
    pub suspended_state: Option<super::fsm::TaskState>,
    pub suspend_reason: Option<String>,
}

impl TaskContext {
    /// Create a fresh context; the input text becomes the first user message
    pub fn new(
        id: impl Into<String>,
        input_text: impl Into<String>,
        source: impl Into<String>,
        task_type: impl Into<String>,
        description: impl Into<String>,
        input_metadata: Value,
    ) -> Self {
        let input_text = input_text.into();
        Self {
            id: id.into(),
            messages: vec![ChatMessage::user(input_text.clone())],
            input_text,
            input_metadata,
            source: source.into(),
            task_type: task_type.into(),
            description: description.into(),
            reasoning: Value::Null,
            plan: None,
            actions_done: Vec::new(),
            reflections: Vec::new(),
            post_reflection: None,
            iteration: 0,
            final_result: None,
            error: None,
            suspended_state: None,
            suspend_reason: None,
        }
    }

    /// First incomplete step of the current plan
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.plan.as_ref().and_then(|p| p.current_step())
    }

    /// Mark a plan step completed; enforces the exactly-once invariant
    pub fn mark_step_done(&mut self, index: usize) -> eyre::Result<()> {
        let plan = self.plan.as_mut().ok_or_else(|| eyre::eyre!("no plan to mark step on"))?;
        let step = plan
            .steps
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or_else(|| eyre::eyre!("no step with index {}", index))?;
        if step.completed {
            eyre::bail!("step {} already completed", index);
        }
        step.completed = true;
        Ok(())
    }

    /// Append a conversation turn
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append an executed-step record
    pub fn record_action(&mut self, action: ActionRecord) {
        self.actions_done.push(action);
    }

    /// Reset cognitive state for a resume: plan, reasoning, results, errors,
    /// iteration count, and suspension checkpoint are cleared; messages and
    /// actions_done are preserved.
    pub fn clear_cognitive_state(&mut self) {
        self.plan = None;
        self.reasoning = Value::Null;
        self.final_result = None;
        self.error = None;
        self.iteration = 0;
        self.suspended_state = None;
        self.suspend_reason = None;
    }

    /// Text of the last respond action, falling back to the last assistant
    /// message; used to compile the final result
    pub fn response_text(&self) -> Option<String> {
        let from_action = self
            .actions_done
            .iter()
            .rev()
            .find(|a| a.action_type == ActionType::Respond)
            .and_then(|a| a.result.get("text").and_then(|t| t.as_str()).map(String::from));
        if from_action.is_some() {
            return from_action;
        }
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.clone())
    }
}
