//! Task finite state machine
//!
//! Encodes the legal transitions between cognitive stages and enforces them.
//! The FSM performs no I/O: it validates the trigger against the transition
//! table, mutates state, appends a history record, and returns the new state.
//!
//! Dynamic resolutions:
//! - ACTING on a step/tool completion stays in ACTING while steps remain,
//!   then goes to REASONING if the plan ran any tool (results must be
//!   integrated) or COMPLETED otherwise.
//! - SUSPENDED on TASK_RESUMED returns to the state it was suspended from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::events::{Event, EventType};

use super::context::TaskContext;
use super::priority::Priority;

/// Cognitive stage of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Idle,
    Reasoning,
    Acting,
    Suspended,
    Completed,
    Failed,
}

impl TaskState {
    /// FAILED is the only terminal state; COMPLETED is resumable
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Failed)
    }

    /// States a TASK_SUSPENDED event is accepted from
    pub fn is_suspendable(&self) -> bool {
        matches!(self, TaskState::Reasoning | TaskState::Acting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Idle => "IDLE",
            TaskState::Reasoning => "REASONING",
            TaskState::Acting => "ACTING",
            TaskState::Suspended => "SUSPENDED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// FSM errors
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("invalid transition: {event} in state {from}")]
    InvalidTransition { from: TaskState, event: EventType },
}

/// One recorded transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    pub trigger_type: EventType,
    pub trigger_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

/// A task: its FSM state wrapped around its context
#[derive(Debug, Clone)]
pub struct TaskFsm {
    pub task_id: String,
    pub state: TaskState,
    pub history: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub priority: Priority,
    pub metadata: Value,
    pub context: TaskContext,
}

impl TaskFsm {
    /// Create a task in IDLE
    pub fn new(context: TaskContext) -> Self {
        let now = Utc::now();
        Self {
            task_id: context.id.clone(),
            state: TaskState::Idle,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            priority: Priority::default(),
            metadata: Value::Null,
            context,
        }
    }

    /// Rebuild a task from a replayed context, e.g. for resume-after-restart
    pub fn hydrated(context: TaskContext, state: TaskState) -> Self {
        let mut fsm = Self::new(context);
        fsm.state = state;
        fsm.metadata = serde_json::json!({"hydrated": true});
        fsm
    }

    /// Apply a trigger event; on success the state has changed and a history
    /// record was appended
    pub fn apply(&mut self, trigger: &Event) -> Result<TaskState, FsmError> {
        let from = self.state;
        let to = self.resolve(trigger)?;

        self.history.push(TransitionRecord {
            from,
            to,
            trigger_type: trigger.event_type,
            trigger_id: trigger.id.clone(),
            timestamp: Utc::now(),
            metadata: Value::Null,
        });
        self.state = to;
        self.updated_at = Utc::now();
        Ok(to)
    }

    /// The transition table
    fn resolve(&mut self, trigger: &Event) -> Result<TaskState, FsmError> {
        let from = self.state;
        let event = trigger.event_type;

        let invalid = || FsmError::InvalidTransition { from, event };

        // FAILED rejects everything
        if from == TaskState::Failed {
            return Err(invalid());
        }

        // Any non-terminal state force-fails on TASK_FAILED
        if event == EventType::TaskFailed {
            return Ok(TaskState::Failed);
        }

        match (from, event) {
            (TaskState::Idle, EventType::TaskCreated) => Ok(TaskState::Reasoning),

            (TaskState::Reasoning, EventType::ReasonDone) => Ok(TaskState::Acting),
            (TaskState::Reasoning, EventType::NeedMoreInfo) => {
                self.context.suspended_state = Some(TaskState::Reasoning);
                Ok(TaskState::Suspended)
            }

            (
                TaskState::Acting,
                EventType::ToolCallCompleted | EventType::ToolCallFailed | EventType::StepCompleted,
            ) => Ok(self.resolve_acting()),

            (TaskState::Suspended, EventType::TaskResumed) => {
                let target = self.context.suspended_state.take().unwrap_or(TaskState::Reasoning);
                self.context.suspend_reason = None;
                Ok(target)
            }
            (TaskState::Suspended, EventType::MessageReceived) => {
                self.context.suspended_state = None;
                self.context.suspend_reason = None;
                Ok(TaskState::Reasoning)
            }

            (TaskState::Completed, EventType::TaskResumed) => Ok(TaskState::Reasoning),

            (state, EventType::TaskSuspended) if state.is_suspendable() => {
                self.context.suspended_state = Some(state);
                Ok(TaskState::Suspended)
            }

            _ => Err(invalid()),
        }
    }

    /// Dynamic resolution while ACTING: continue, integrate, or finish
    fn resolve_acting(&self) -> TaskState {
        match &self.context.plan {
            Some(plan) if !plan.all_steps_complete() => TaskState::Acting,
            Some(plan) if plan.has_tool_call() => TaskState::Reasoning,
            Some(_) => TaskState::Completed,
            // No plan while acting should not happen; fall back to reasoning
            None => TaskState::Reasoning,
        }
    }
}
