//! Echo tool - mostly useful for wiring tests

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::context::ToolContext;
use crate::tools::traits::Tool;

/// Echoes its input back
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Echo the given text back"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> eyre::Result<Value> {
        let text = params
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| eyre::eyre!("text must be a string"))?;
        Ok(json!({"text": text}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let ctx = ToolContext::default();
        let result = EchoTool.execute(json!({"text": "hello"}), &ctx).await.unwrap();
        assert_eq!(result["text"], "hello");
    }
}
