//! Conversation orchestrator: queue, think loop, session, skills

pub mod convo;
pub mod core;
pub mod prompt;
pub mod session;
pub mod skills;

pub use convo::{ChannelSink, CollectingSink, OutboundMessage, conversation_tool_definitions, is_terminal_tool};
pub use core::{ChannelRef, Orchestrator, QueueItem, reflection_gate};
pub use prompt::{REFLECTION_PROMPT, SUMMARIZER_PROMPT, render_system_prompt};
pub use session::SessionStore;
pub use skills::{Skill, SkillMode, SkillRegistry};
