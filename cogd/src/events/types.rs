//! Event model
//!
//! Every observable state change in cogd flows through an [`Event`]. Events
//! are immutable after construction: build one with [`Event::new`] and the
//! `with_*` helpers, then emit it on the bus.
//!
//! Event types form a closed numeric enumeration partitioned into ranges:
//! system (0-99), external input (100-199), task lifecycle (200-299),
//! cognitive (300-399), tools (400-499), auth (500-549). The numeric code
//! doubles as the default dispatch priority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids;

/// The closed vocabulary of cogd events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // === System (0-99) ===
    Shutdown,

    // === External input (100-199) ===
    MessageReceived,
    ScheduleTriggered,
    WebhookReceived,

    // === Task lifecycle (200-299) ===
    TaskCreated,
    TaskSuspended,
    TaskResumed,
    TaskCompleted,
    TaskFailed,

    // === Cognitive (300-399) ===
    ReasonDone,
    NeedMoreInfo,
    StepCompleted,

    // === Tools (400-499) ===
    ToolCallRequested,
    ToolCallCompleted,
    ToolCallFailed,

    // === Auth (500-549) ===
    AuthRequired,
    AuthCompleted,
}

impl EventType {
    /// Numeric code within the range partition; doubles as default priority
    pub fn code(&self) -> u16 {
        match self {
            EventType::Shutdown => 0,
            EventType::MessageReceived => 100,
            EventType::ScheduleTriggered => 101,
            EventType::WebhookReceived => 102,
            EventType::TaskCreated => 200,
            EventType::TaskSuspended => 201,
            EventType::TaskResumed => 202,
            EventType::TaskCompleted => 203,
            EventType::TaskFailed => 204,
            EventType::ReasonDone => 300,
            EventType::NeedMoreInfo => 301,
            EventType::StepCompleted => 302,
            EventType::ToolCallRequested => 400,
            EventType::ToolCallCompleted => 401,
            EventType::ToolCallFailed => 402,
            EventType::AuthRequired => 500,
            EventType::AuthCompleted => 501,
        }
    }

    /// Uppercase token used in persisted logs, e.g. `TASK_CREATED`
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Shutdown => "SHUTDOWN",
            EventType::MessageReceived => "MESSAGE_RECEIVED",
            EventType::ScheduleTriggered => "SCHEDULE_TRIGGERED",
            EventType::WebhookReceived => "WEBHOOK_RECEIVED",
            EventType::TaskCreated => "TASK_CREATED",
            EventType::TaskSuspended => "TASK_SUSPENDED",
            EventType::TaskResumed => "TASK_RESUMED",
            EventType::TaskCompleted => "TASK_COMPLETED",
            EventType::TaskFailed => "TASK_FAILED",
            EventType::ReasonDone => "REASON_DONE",
            EventType::NeedMoreInfo => "NEED_MORE_INFO",
            EventType::StepCompleted => "STEP_COMPLETED",
            EventType::ToolCallRequested => "TOOL_CALL_REQUESTED",
            EventType::ToolCallCompleted => "TOOL_CALL_COMPLETED",
            EventType::ToolCallFailed => "TOOL_CALL_FAILED",
            EventType::AuthRequired => "AUTH_REQUIRED",
            EventType::AuthCompleted => "AUTH_COMPLETED",
        }
    }

    /// Parse the uppercase token form; unknown tokens return None so log
    /// readers can skip events they do not understand
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "SHUTDOWN" => EventType::Shutdown,
            "MESSAGE_RECEIVED" => EventType::MessageReceived,
            "SCHEDULE_TRIGGERED" => EventType::ScheduleTriggered,
            "WEBHOOK_RECEIVED" => EventType::WebhookReceived,
            "TASK_CREATED" => EventType::TaskCreated,
            "TASK_SUSPENDED" => EventType::TaskSuspended,
            "TASK_RESUMED" => EventType::TaskResumed,
            "TASK_COMPLETED" => EventType::TaskCompleted,
            "TASK_FAILED" => EventType::TaskFailed,
            "REASON_DONE" => EventType::ReasonDone,
            "NEED_MORE_INFO" => EventType::NeedMoreInfo,
            "STEP_COMPLETED" => EventType::StepCompleted,
            "TOOL_CALL_REQUESTED" => EventType::ToolCallRequested,
            "TOOL_CALL_COMPLETED" => EventType::ToolCallCompleted,
            "TOOL_CALL_FAILED" => EventType::ToolCallFailed,
            "AUTH_REQUIRED" => EventType::AuthRequired,
            "AUTH_COMPLETED" => EventType::AuthCompleted,
            _ => return None,
        })
    }

    /// External-input events create new tasks when they carry no task ID
    pub fn is_external_input(&self) -> bool {
        (100..200).contains(&self.code())
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable event record
///
/// `parent_event_id` records causality: an event produced while handling
/// another event carries the trigger's ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
}

impl Event {
    /// Create a new event with a generated ID and the current timestamp
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: ids::event_id(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            task_id: None,
            payload: Value::Null,
            priority: None,
            parent_event_id: None,
        }
    }

    /// Attach the owning task's ID
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Override the dispatch priority
    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Record the triggering event for causality tracking
    pub fn with_parent(mut self, parent_event_id: impl Into<String>) -> Self {
        self.parent_event_id = Some(parent_event_id.into());
        self
    }

    /// Priority used for queue ordering; lower dispatches first
    pub fn effective_priority(&self) -> u16 {
        self.priority.unwrap_or_else(|| self.event_type.code())
    }
}
