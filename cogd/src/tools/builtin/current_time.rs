//! Current time tool

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::tools::context::ToolContext;
use crate::tools::traits::Tool;

/// Returns the current UTC time
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time (UTC)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> eyre::Result<Value> {
        let now = Utc::now();
        Ok(json!({
            "iso": now.to_rfc3339(),
            "unixMs": now.timestamp_millis(),
        }))
    }
}
