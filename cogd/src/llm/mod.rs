//! LLM client trait and request/response types

pub mod client;
pub mod error;
pub mod types;

pub use client::{DEFAULT_CONTEXT_WINDOW, LlmClient, ScriptedClient};
pub use error::LlmError;
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, Role, TokenUsage, ToolCallRequest, ToolDefinition,
    estimate_messages_tokens, estimate_tokens,
};
