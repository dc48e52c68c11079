//! Task model: context, finite state machine, registry

pub mod context;
pub mod fsm;
pub mod priority;
pub mod registry;

pub use context::{ActionRecord, ActionType, Plan, PlanStep, TaskContext};
pub use fsm::{FsmError, TaskFsm, TaskState, TransitionRecord};
pub use priority::Priority;
pub use registry::{RegistryError, SharedRegistry, TaskRegistry};
