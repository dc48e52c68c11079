//! Tool system: trait, registry-backed executor, built-ins

pub mod builtin;
pub mod context;
pub mod executor;
pub mod schema;
pub mod traits;

pub use context::ToolContext;
pub use executor::{DEFAULT_MAX_RESULT_CHARS, MAX_TOOL_TIMEOUT, TRUNCATION_MARKER, ToolExecutor, ToolStats};
pub use traits::{Tool, ToolResult};
