//! Built-in tools

mod current_time;
mod echo;

use std::sync::Arc;

pub use current_time::CurrentTimeTool;
pub use echo::EchoTool;

use super::traits::Tool;

/// The built-in tool set
pub fn all() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(CurrentTimeTool), Arc::new(EchoTool)]
}
