//! Replay - fold a task's JSONL log back into a TaskContext
//!
//! Readers tolerate unknown events (skipped) and unknown fields (ignored),
//! so logs written by newer versions still replay.

use std::path::Path;

use eyre::Result;
use serde_json::Value;
use tokio::fs;

use crate::llm::ChatMessage;
use crate::task::{ActionRecord, Plan, TaskContext, TaskState};

use super::persister::LogRecord;

/// Read and parse a task log; unparseable lines are skipped
pub async fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
    let content = fs::read_to_string(path).await?;
    Ok(content.lines().filter_map(|line| serde_json::from_str(line).ok()).collect())
}

/// Replay a task log file into a fresh context
pub async fn replay(path: &Path) -> Result<TaskContext> {
    let records = read_records(path).await?;
    fold(&records)
}

/// The state a replayed task is in after its last persisted event
///
/// None means the log never got a TASK_CREATED and cannot be interpreted.
pub fn terminal_state(records: &[LogRecord]) -> Option<TaskState> {
    let mut state = None;
    for record in records {
        match record.event.as_str() {
            "TASK_CREATED" => state = Some(TaskState::Reasoning),
            "REASON_DONE" => state = Some(TaskState::Acting),
            "NEED_MORE_INFO" | "TASK_SUSPENDED" => state = Some(TaskState::Suspended),
            "TASK_RESUMED" => state = Some(TaskState::Reasoning),
            "TASK_COMPLETED" => state = Some(TaskState::Completed),
            "TASK_FAILED" => state = Some(TaskState::Failed),
            _ => {}
        }
    }
    state
}

/// Fold log records, in order, into a TaskContext
pub fn fold(records: &[LogRecord]) -> Result<TaskContext> {
    let mut ctx: Option<TaskContext> = None;

    for record in records {
        match record.event.as_str() {
            "TASK_CREATED" => {
                let data = &record.data;
                ctx = Some(TaskContext::new(
                    record.task_id.clone(),
                    data.get("inputText").and_then(|v| v.as_str()).unwrap_or_default(),
                    data.get("source").and_then(|v| v.as_str()).unwrap_or_default(),
                    data.get("taskType").and_then(|v| v.as_str()).unwrap_or("general"),
                    data.get("description").and_then(|v| v.as_str()).unwrap_or_default(),
                    data.get("inputMetadata").cloned().unwrap_or(Value::Null),
                ));
            }
            "REASON_DONE" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                if let Some(reasoning) = record.data.get("reasoning") {
                    ctx.reasoning = reasoning.clone();
                }
                ctx.plan = parse_plan(&record.data);
                extend_messages(ctx, &record.data);
            }
            "TOOL_CALL_COMPLETED" | "TOOL_CALL_FAILED" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                extend_messages(ctx, &record.data);
                push_action(ctx, &record.data);
            }
            "STEP_COMPLETED" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                push_action(ctx, &record.data);
            }
            "NEED_MORE_INFO" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                if let Some(reasoning) = record.data.get("reasoning") {
                    ctx.reasoning = reasoning.clone();
                }
            }
            "TASK_SUSPENDED" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                ctx.suspended_state = record
                    .data
                    .get("suspendedState")
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
                ctx.suspend_reason = record
                    .data
                    .get("suspendReason")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                if let Some(reasoning) = record.data.get("reasoning") {
                    ctx.reasoning = reasoning.clone();
                }
                ctx.plan = parse_plan(&record.data);
                extend_messages(ctx, &record.data);
            }
            "TASK_RESUMED" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                // Mirrors Agent::resume: cognitive state resets, history stays
                ctx.clear_cognitive_state();
                if let Some(input) = record.data.get("newInput").and_then(|v| v.as_str()) {
                    ctx.push_message(ChatMessage::user(input));
                }
            }
            "TASK_COMPLETED" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                ctx.final_result = record.data.get("finalResult").cloned().filter(|v| !v.is_null());
                if let Some(iterations) = record.data.get("iterations").and_then(|v| v.as_u64()) {
                    ctx.iteration = iterations as u32;
                }
                extend_messages(ctx, &record.data);
            }
            "TASK_FAILED" => {
                let Some(ctx) = ctx.as_mut() else { continue };
                ctx.error = record.data.get("error").and_then(|v| v.as_str()).map(String::from);
            }
            // Unknown events: tolerated and skipped
            _ => {}
        }
    }

    ctx.ok_or_else(|| eyre::eyre!("log contains no TASK_CREATED record"))
}

fn parse_plan(data: &Value) -> Option<Plan> {
    data.get("plan")
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value::<Plan>(v.clone()).ok())
}

fn extend_messages(ctx: &mut TaskContext, data: &Value) {
    if let Some(messages) = data.get("newMessages").and_then(|v| v.as_array()) {
        for raw in messages {
            if let Ok(message) = serde_json::from_value::<ChatMessage>(raw.clone()) {
                ctx.push_message(message);
            }
        }
    }
}

fn push_action(ctx: &mut TaskContext, data: &Value) {
    if let Some(action) = data
        .get("action")
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value::<ActionRecord>(v.clone()).ok())
    {
        ctx.record_action(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ActionType;
    use serde_json::json;

    fn record(event: &str, data: Value) -> LogRecord {
        LogRecord::new(event, "task-1", data)
    }

    fn created() -> LogRecord {
        record(
            "TASK_CREATED",
            json!({
                "inputText": "what time is it",
                "source": "test",
                "inputMetadata": null,
                "taskType": "general",
                "description": "time query",
            }),
        )
    }

    #[test]
    fn test_fold_creation() {
        let ctx = fold(&[created()]).unwrap();
        assert_eq!(ctx.id, "task-1");
        assert_eq!(ctx.input_text, "what time is it");
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].content, "what time is it");
    }

    #[test]
    fn test_fold_without_creation_fails() {
        assert!(fold(&[record("REASON_DONE", json!({}))]).is_err());
    }

    #[test]
    fn test_fold_full_run() {
        let records = vec![
            created(),
            record(
                "REASON_DONE",
                json!({
                    "reasoning": {"thought": "call the clock"},
                    "plan": {
                        "goal": "answer",
                        "reasoning": "need the time",
                        "steps": [
                            {"index": 0, "description": "get time", "actionType": "tool_call", "actionParams": {}, "completed": false}
                        ]
                    },
                    "newMessages": [{"role": "assistant", "content": "thinking"}],
                }),
            ),
            record(
                "TOOL_CALL_COMPLETED",
                json!({
                    "newMessages": [{"role": "tool", "content": "{\"iso\":\"now\"}", "toolCallId": "c1"}],
                    "action": {
                        "stepIndex": 0,
                        "actionType": "tool_call",
                        "description": "get time",
                        "result": {"iso": "now"},
                        "startedAt": "2026-08-01T00:00:00Z",
                        "completedAt": "2026-08-01T00:00:01Z",
                        "durationMs": 1000
                    },
                }),
            ),
            record(
                "TASK_COMPLETED",
                json!({
                    "finalResult": {"response": "it is now"},
                    "iterations": 2,
                    "newMessages": [],
                }),
            ),
        ];

        let ctx = fold(&records).unwrap();
        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.reasoning["thought"], "call the clock");
        assert_eq!(ctx.actions_done.len(), 1);
        assert_eq!(ctx.actions_done[0].action_type, ActionType::ToolCall);
        assert_eq!(ctx.iteration, 2);
        assert_eq!(ctx.final_result.unwrap()["response"], "it is now");
        assert_eq!(terminal_state(&records), Some(TaskState::Completed));
    }

    #[test]
    fn test_fold_resume_clears_cognitive_state_keeps_history() {
        let records = vec![
            created(),
            record(
                "REASON_DONE",
                json!({
                    "reasoning": {"thought": "x"},
                    "plan": {"goal": "g", "reasoning": "r", "steps": []},
                    "newMessages": [{"role": "assistant", "content": "reply"}],
                }),
            ),
            record("TASK_COMPLETED", json!({"finalResult": {"response": "reply"}, "iterations": 1, "newMessages": []})),
            record("TASK_RESUMED", json!({"newInput": "follow up", "previousState": "COMPLETED"})),
        ];

        let ctx = fold(&records).unwrap();
        assert!(ctx.plan.is_none());
        assert!(ctx.final_result.is_none());
        assert_eq!(ctx.iteration, 0);
        // Original messages plus the resume input survive
        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.messages.last().unwrap().content, "follow up");
        assert_eq!(terminal_state(&records), Some(TaskState::Reasoning));
    }

    #[test]
    fn test_fold_failure() {
        let records = vec![
            created(),
            record("TASK_FAILED", json!({"error": "process restarted, task cancelled"})),
        ];
        let ctx = fold(&records).unwrap();
        assert_eq!(ctx.error.as_deref(), Some("process restarted, task cancelled"));
        assert_eq!(terminal_state(&records), Some(TaskState::Failed));
    }

    #[test]
    fn test_unknown_events_skipped() {
        let records = vec![created(), record("FUTURE_EVENT", json!({"anything": true}))];
        let ctx = fold(&records).unwrap();
        assert_eq!(ctx.messages.len(), 1);
    }

    #[test]
    fn test_suspension_replayed() {
        let records = vec![
            created(),
            record(
                "TASK_SUSPENDED",
                json!({
                    "suspendedState": "REASONING",
                    "suspendReason": "waiting for user",
                    "reasoning": {"q": "?"},
                    "plan": null,
                    "newMessages": [],
                }),
            ),
        ];
        let ctx = fold(&records).unwrap();
        assert_eq!(ctx.suspended_state, Some(TaskState::Reasoning));
        assert_eq!(ctx.suspend_reason.as_deref(), Some("waiting for user"));
        assert_eq!(terminal_state(&records), Some(TaskState::Suspended));
    }
}
