//! Conversation-layer tool surface and outbound channel seam
//!
//! These are the tools the model sees at the conversation layer. `reply` and
//! `spawn_subagent` are terminal for a turn; every other tool result queues
//! another think so the model can integrate it.

use async_trait::async_trait;
use eyre::Result;
use serde_json::json;

use crate::llm::ToolDefinition;

/// A user-visible message on its way out
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel_type: Option<String>,
    pub channel_id: String,
    pub text: String,
    pub reply_to: Option<String>,
}

/// Channel adapters are external; this is the seam they implement
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn deliver(&self, message: OutboundMessage) -> Result<()>;
}

/// Collects outbound messages; the test stand-in for a real channel
#[derive(Default)]
pub struct CollectingSink {
    sent: std::sync::Mutex<Vec<OutboundMessage>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("sink poisoned").clone()
    }
}

#[async_trait]
impl ChannelSink for CollectingSink {
    async fn deliver(&self, message: OutboundMessage) -> Result<()> {
        self.sent.lock().expect("sink poisoned").push(message);
        Ok(())
    }
}

/// Tool results that end the turn instead of queueing another think
pub fn is_terminal_tool(name: &str) -> bool {
    matches!(name, "reply" | "spawn_subagent")
}

/// Schemas for the conversation-layer tools
pub fn conversation_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "reply",
            "Send a user-visible message to a channel. This is the ONLY way the user sees your output.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "channel_type": { "type": "string" },
                    "channel_id": { "type": "string" },
                    "reply_to": { "type": "string" }
                },
                "required": ["text"]
            }),
        ),
        ToolDefinition::new(
            "spawn_subagent",
            "Delegate a unit of autonomous work to a background task. The result arrives later as a task notification.",
            json!({
                "type": "object",
                "properties": {
                    "description": { "type": "string" },
                    "input": { "type": "string" },
                    "type": { "type": "string" }
                },
                "required": ["description", "input"]
            }),
        ),
        ToolDefinition::new(
            "resume_task",
            "Resume a previously completed task with new input.",
            json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "input": { "type": "string" }
                },
                "required": ["task_id", "input"]
            }),
        ),
        ToolDefinition::new(
            "use_skill",
            "Invoke a saved skill by name.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "args": { "type": "string" }
                },
                "required": ["name"]
            }),
        ),
    ]
}
