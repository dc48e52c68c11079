//! Cognition traits: the Thinker, the planner, and the Reflector
//!
//! The Thinker is the LLM-backed decision step: context in, reasoning plus
//! either a plan or a clarification request out. The planner is the pure
//! function that turns the model's raw plan JSON into an indexed [`Plan`].
//! The Reflector runs after completed tasks; only the gating decision and
//! output integration are wired here, the content is up to the impl.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use serde_json::{Value, json};

use crate::llm::{CompletionRequest, LlmClient, ToolDefinition};
use crate::task::{ActionType, Plan, PlanStep, TaskContext};

/// What the Thinker decided
#[derive(Debug, Clone)]
pub enum ThinkDecision {
    /// Proceed to acting with this plan
    Plan(Plan),
    /// Suspend until someone answers the question
    NeedMoreInfo { question: String },
}

/// Output of one Thinker invocation
#[derive(Debug, Clone)]
pub struct ThinkOutcome {
    /// Structured reasoning, stored opaquely on the context
    pub reasoning: Value,
    /// Assistant-visible text appended to the task's messages
    pub assistant_text: Option<String>,
    pub decision: ThinkDecision,
}

impl ThinkOutcome {
    /// A single-step respond plan
    pub fn respond(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            reasoning: json!({"thought": "respond directly"}),
            assistant_text: Some(text.clone()),
            decision: ThinkDecision::Plan(normalize_plan(
                "respond to the user",
                "direct response",
                vec![RawStep {
                    description: "respond".to_string(),
                    action: ActionType::Respond,
                    params: json!({"text": text}),
                }],
            )),
        }
    }

    /// A single-step tool-call plan
    pub fn tool_call(tool: impl Into<String>, params: Value) -> Self {
        let tool = tool.into();
        Self {
            reasoning: json!({"thought": format!("call {}", tool)}),
            assistant_text: None,
            decision: ThinkDecision::Plan(normalize_plan(
                "gather information",
                "a tool is needed",
                vec![RawStep {
                    description: format!("call {}", tool),
                    action: ActionType::ToolCall,
                    params: json!({"tool": tool, "params": params}),
                }],
            )),
        }
    }

    /// A clarification request
    pub fn need_more_info(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            reasoning: json!({"thought": "insufficient information"}),
            assistant_text: None,
            decision: ThinkDecision::NeedMoreInfo { question },
        }
    }
}

/// The LLM-backed decision step
#[async_trait]
pub trait Thinker: Send + Sync {
    async fn think(&self, ctx: &TaskContext, tools: &[ToolDefinition]) -> Result<ThinkOutcome>;
}

/// Post-task reflection; returning None skips integration
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, ctx: &TaskContext) -> Result<Option<Value>>;
}

/// A raw plan step as parsed from model output, before indexing
#[derive(Debug, Clone)]
pub struct RawStep {
    pub description: String,
    pub action: ActionType,
    pub params: Value,
}

/// The planner: turn raw steps into an indexed, incomplete plan
pub fn normalize_plan(goal: impl Into<String>, reasoning: impl Into<String>, steps: Vec<RawStep>) -> Plan {
    Plan {
        goal: goal.into(),
        reasoning: reasoning.into(),
        steps: steps
            .into_iter()
            .enumerate()
            .map(|(index, raw)| PlanStep {
                index,
                description: raw.description,
                action_type: raw.action,
                action_params: raw.params,
                completed: false,
            })
            .collect(),
    }
}

/// Parse a model response into a ThinkOutcome
///
/// Expected JSON (fenced or bare):
/// `{"reasoning": ..., "goal": "...", "steps": [{"description", "action",
/// "params"}]}` or `{"reasoning": ..., "need_more_info": "question"}`.
pub fn parse_outcome(text: &str) -> Result<ThinkOutcome> {
    let value = extract_json(text).ok_or_else(|| eyre::eyre!("no JSON object in thinker output"))?;

    let reasoning = value.get("reasoning").cloned().unwrap_or_else(|| json!({"text": text}));
    let assistant_text = value
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
        .filter(|s| !s.is_empty());

    if let Some(question) = value.get("need_more_info").and_then(|q| q.as_str()) {
        return Ok(ThinkOutcome {
            reasoning,
            assistant_text,
            decision: ThinkDecision::NeedMoreInfo {
                question: question.to_string(),
            },
        });
    }

    let goal = value.get("goal").and_then(|g| g.as_str()).unwrap_or("").to_string();
    let plan_reasoning = value
        .get("plan_reasoning")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string();
    let raw_steps = value
        .get("steps")
        .and_then(|s| s.as_array())
        .ok_or_else(|| eyre::eyre!("thinker output has neither steps nor need_more_info"))?;

    let mut steps = Vec::with_capacity(raw_steps.len());
    for raw in raw_steps {
        let description = raw
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string();
        let action = match raw.get("action").and_then(|a| a.as_str()) {
            Some("tool_call") => ActionType::ToolCall,
            Some("respond") => ActionType::Respond,
            Some("stub") | None => ActionType::Stub,
            Some(other) => eyre::bail!("unknown step action: {}", other),
        };
        steps.push(RawStep {
            description,
            action,
            params: raw.get("params").cloned().unwrap_or(Value::Null),
        });
    }
    if steps.is_empty() {
        eyre::bail!("thinker returned an empty plan");
    }

    Ok(ThinkOutcome {
        reasoning,
        assistant_text,
        decision: ThinkDecision::Plan(normalize_plan(goal, plan_reasoning, steps)),
    })
}

/// Pull the outermost JSON object out of possibly-fenced model text
fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Prompt instructing the model to answer with a plan or a question
const THINKER_PROMPT: &str = "\
You are the reasoning step of an autonomous task worker. Read the
conversation and decide what to do next. Answer with a single JSON object,
either a plan:
{\"reasoning\": {...}, \"goal\": \"...\", \"steps\": [{\"description\": \"...\",
\"action\": \"tool_call\"|\"respond\"|\"stub\", \"params\": {...}}]}
(tool_call params are {\"tool\": \"<name>\", \"params\": {...}}; respond params
are {\"text\": \"...\"}), or a clarification request:
{\"reasoning\": {...}, \"need_more_info\": \"your question\"}.";

/// LLM-backed Thinker: one completion call, parsed into a decision
pub struct LlmThinker {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl LlmThinker {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    fn system_prompt(&self, ctx: &TaskContext, tools: &[ToolDefinition]) -> String {
        let mut prompt = String::from(THINKER_PROMPT);
        if !ctx.description.is_empty() {
            prompt.push_str(&format!("\n\nTask: {}", ctx.description));
        }
        if !tools.is_empty() {
            prompt.push_str("\n\nAvailable tools:");
            for tool in tools {
                prompt.push_str(&format!("\n- {}: {}", tool.name, tool.description));
            }
        }
        prompt
    }
}

#[async_trait]
impl Thinker for LlmThinker {
    async fn think(&self, ctx: &TaskContext, tools: &[ToolDefinition]) -> Result<ThinkOutcome> {
        let request = CompletionRequest {
            system_prompt: self.system_prompt(ctx, tools),
            messages: ctx.messages.clone(),
            tools: tools.to_vec(),
            max_tokens: self.max_tokens,
        };
        let response = self.llm.complete(request).await?;
        let content = response
            .content
            .ok_or_else(|| eyre::eyre!("thinker got an empty completion"))?;
        parse_outcome(&content)
    }
}

/// Heuristic deciding whether a completed task deserves reflection
#[derive(Debug, Clone, Copy)]
pub struct ReflectionGate {
    pub min_iterations: u32,
    pub min_actions: usize,
    pub min_response_chars: usize,
}

impl Default for ReflectionGate {
    fn default() -> Self {
        Self {
            min_iterations: 2,
            min_actions: 3,
            min_response_chars: 400,
        }
    }
}

impl ReflectionGate {
    /// Any one signal crossing its threshold is enough
    pub fn should_reflect(&self, ctx: &TaskContext) -> bool {
        if ctx.iteration >= self.min_iterations {
            return true;
        }
        if ctx.actions_done.len() >= self.min_actions {
            return true;
        }
        ctx.response_text().map(|r| r.len()).unwrap_or(0) >= self.min_response_chars
    }
}

/// Plays back a fixed sequence of think outcomes
///
/// When the script runs dry it keeps returning the last outcome, which is
/// how the runaway-iteration scenarios are driven.
pub struct ScriptedThinker {
    script: std::sync::Mutex<VecDeque<ThinkOutcome>>,
    repeat_last: Option<ThinkOutcome>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedThinker {
    pub fn new(outcomes: Vec<ThinkOutcome>) -> Self {
        Self {
            script: std::sync::Mutex::new(outcomes.into_iter().collect()),
            repeat_last: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Keep returning `outcome` after the script is exhausted
    pub fn repeating(outcome: ThinkOutcome) -> Self {
        Self {
            script: std::sync::Mutex::new(VecDeque::new()),
            repeat_last: Some(outcome),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Thinker for ScriptedThinker {
    async fn think(&self, _ctx: &TaskContext, _tools: &[ToolDefinition]) -> Result<ThinkOutcome> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.script.lock().expect("script poisoned").pop_front();
        match next.or_else(|| self.repeat_last.clone()) {
            Some(outcome) => Ok(outcome),
            None => eyre::bail!("thinker script exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_outcome() {
        let text = r#"Here is my plan:
{"reasoning": {"thought": "need the time"}, "goal": "answer", "steps": [
  {"description": "get time", "action": "tool_call", "params": {"tool": "current_time", "params": {}}},
  {"description": "respond", "action": "respond", "params": {"text": "..."}}
]}"#;
        let outcome = parse_outcome(text).unwrap();
        let ThinkDecision::Plan(plan) = outcome.decision else {
            panic!("expected plan");
        };
        assert_eq!(plan.goal, "answer");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].index, 0);
        assert_eq!(plan.steps[0].action_type, ActionType::ToolCall);
        assert_eq!(plan.steps[1].index, 1);
        assert!(!plan.steps.iter().any(|s| s.completed));
    }

    #[test]
    fn test_parse_need_more_info() {
        let text = r#"{"reasoning": {"thought": "ambiguous"}, "need_more_info": "which timezone?"}"#;
        let outcome = parse_outcome(text).unwrap();
        assert!(matches!(
            outcome.decision,
            ThinkDecision::NeedMoreInfo { ref question } if question == "which timezone?"
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_outcome("no json here at all").is_err());
        assert!(parse_outcome("{\"reasoning\": {}}").is_err());
        assert!(parse_outcome("{\"steps\": []}").is_err());
    }

    #[test]
    fn test_parse_unknown_action_rejected() {
        let text = r#"{"steps": [{"description": "x", "action": "teleport"}]}"#;
        assert!(parse_outcome(text).is_err());
    }

    #[test]
    fn test_normalize_plan_assigns_indexes() {
        let plan = normalize_plan(
            "g",
            "r",
            vec![
                RawStep {
                    description: "a".to_string(),
                    action: ActionType::Stub,
                    params: Value::Null,
                },
                RawStep {
                    description: "b".to_string(),
                    action: ActionType::Respond,
                    params: Value::Null,
                },
            ],
        );
        assert_eq!(plan.steps[0].index, 0);
        assert_eq!(plan.steps[1].index, 1);
    }

    #[test]
    fn test_reflection_gate() {
        let gate = ReflectionGate::default();
        let mut ctx = TaskContext::new("task-1", "hi", "test", "general", "", Value::Null);
        assert!(!gate.should_reflect(&ctx));

        ctx.iteration = 2;
        assert!(gate.should_reflect(&ctx));

        ctx.iteration = 1;
        ctx.push_message(crate::llm::ChatMessage::assistant("x".repeat(500)));
        assert!(gate.should_reflect(&ctx));
    }

    #[tokio::test]
    async fn test_llm_thinker_parses_completion() {
        use crate::llm::{CompletionResponse, ScriptedClient};

        let client = Arc::new(ScriptedClient::new(vec![CompletionResponse::text(
            r#"{"reasoning": {"thought": "clock"}, "goal": "tell time", "steps": [
                {"description": "get time", "action": "tool_call", "params": {"tool": "current_time", "params": {}}}
            ]}"#,
        )]));
        let thinker = LlmThinker::new(client.clone(), 1024);

        let ctx = TaskContext::new("task-1", "what time is it", "test", "general", "time", Value::Null);
        let tools = vec![ToolDefinition::new("current_time", "Get the time", json!({"type": "object"}))];
        let outcome = thinker.think(&ctx, &tools).await.unwrap();

        let ThinkDecision::Plan(plan) = outcome.decision else {
            panic!("expected plan");
        };
        assert_eq!(plan.goal, "tell time");
        assert_eq!(plan.steps[0].action_params["tool"], "current_time");

        // The system prompt advertised the gated tool set
        let request = &client.requests()[0];
        assert!(request.system_prompt.contains("current_time: Get the time"));
        assert_eq!(request.messages[0].content, "what time is it");
    }

    #[tokio::test]
    async fn test_scripted_thinker_playback_and_repeat() {
        let ctx = TaskContext::new("task-1", "hi", "test", "general", "", Value::Null);
        let thinker = ScriptedThinker::new(vec![ThinkOutcome::respond("one")]);
        assert!(thinker.think(&ctx, &[]).await.is_ok());
        assert!(thinker.think(&ctx, &[]).await.is_err());

        let repeating = ScriptedThinker::repeating(ThinkOutcome::tool_call("echo", json!({"text": "x"})));
        for _ in 0..5 {
            assert!(repeating.think(&ctx, &[]).await.is_ok());
        }
        assert_eq!(repeating.call_count(), 5);
    }
}
