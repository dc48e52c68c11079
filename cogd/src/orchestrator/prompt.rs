//! System prompt rendering
//!
//! The conversation system prompt is rendered once at startup (stable text
//! keeps the provider's prompt cache warm) from a handlebars template over
//! the visible tools and registered skills.

use eyre::Result;
use handlebars::Handlebars;
use serde_json::json;

use crate::llm::ToolDefinition;

/// The inner-monologue system prompt
const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are the conversational core of a long-running assistant.

Your plain text output is PRIVATE inner monologue; the user never sees it.
The only way to say something to the user is the `reply` tool. Delegate
autonomous work with `spawn_subagent`, continue earlier work with
`resume_task`, and invoke a saved skill with `use_skill`.

Available tools:
{{#each tools}}
- {{name}}: {{description}}
{{/each}}
{{#if skills}}

Available skills (invoke with use_skill or /name):
{{#each skills}}
- {{this}}
{{/each}}
{{/if}}
";

/// System prompt for the compaction summarizer call
pub const SUMMARIZER_PROMPT: &str = "\
Summarize the conversation so far into a compact briefing for your future \
self: open tasks and their ids, user preferences, decisions made, and any \
unanswered questions. Reply with the summary text only.";

/// System prompt for the post-compaction reflection pass
pub const REFLECTION_PROMPT: &str = "\
Review the archived conversation and note, in a few sentences, what went \
well, what to do differently, and anything worth remembering long-term. \
Reply with the reflection text only.";

/// Render the stable conversation system prompt
pub fn render_system_prompt(tools: &[ToolDefinition], skills: &[String]) -> Result<String> {
    let handlebars = Handlebars::new();
    let rendered = handlebars.render_template(
        SYSTEM_PROMPT_TEMPLATE,
        &json!({
            "tools": tools.iter().map(|t| json!({"name": t.name, "description": t.description})).collect::<Vec<_>>(),
            "skills": skills,
        }),
    )?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_tools_and_skills() {
        let tools = vec![ToolDefinition::new("reply", "Send a user-visible message", serde_json::json!({}))];
        let skills = vec!["research".to_string()];
        let prompt = render_system_prompt(&tools, &skills).unwrap();

        assert!(prompt.contains("reply: Send a user-visible message"));
        assert!(prompt.contains("- research"));
        assert!(prompt.contains("PRIVATE inner monologue"));
    }

    #[test]
    fn test_render_without_skills() {
        let prompt = render_system_prompt(&[], &[]).unwrap();
        assert!(!prompt.contains("Available skills"));
    }
}
