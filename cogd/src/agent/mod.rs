//! Agent: event processor, cognition traits, subagent gating

pub mod cognition;
pub mod core;
pub mod subagent;

pub use cognition::{
    LlmThinker, RawStep, ReflectionGate, Reflector, ScriptedThinker, ThinkDecision, ThinkOutcome, Thinker,
    normalize_plan, parse_outcome,
};
pub use core::{Agent, NotifyCallback, TaskNotification};
pub use subagent::{DEFAULT_TASK_TYPE, SubagentDef, SubagentRegistry};
