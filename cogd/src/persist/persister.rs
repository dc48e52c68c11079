//! Task persister - append-only durable log of task-mutating events
//!
//! Layout under the data root:
//! - `tasks/YYYY-MM-DD/{taskId}.jsonl` - one JSON object per line
//! - `tasks/index.jsonl` - append-only `{taskId, date}`; last write wins
//! - `tasks/pending.json` - in-flight task IDs, rewritten atomically
//!
//! Each subscribed event appends one line carrying the minimum delta needed
//! to reconstruct the part of the context it changed. New messages are
//! tracked with a per-task cursor so every line only carries what was
//! appended since the previous one. Write failures are logged as warnings
//! and never block the triggering event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::events::{Event, EventBus, EventHandler, EventType};
use crate::task::{SharedRegistry, TaskState};

/// Error recorded for tasks found pending after a crash
pub const CRASH_RECOVERY_ERROR: &str = "process restarted, task cancelled";

/// One line of a task's JSONL log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch
    pub ts: i64,
    /// Uppercase event token, e.g. `TASK_CREATED`
    pub event: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(default)]
    pub data: Value,
}

impl LogRecord {
    pub fn new(event: impl Into<String>, task_id: impl Into<String>, data: Value) -> Self {
        Self {
            ts: Utc::now().timestamp_millis(),
            event: event.into(),
            task_id: task_id.into(),
            data,
        }
    }
}

/// One entry of `pending.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub ts: i64,
}

/// One entry of `index.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    #[serde(rename = "taskId")]
    task_id: String,
    date: String,
}

/// Append-only task event log with crash recovery
pub struct TaskPersister {
    data_root: PathBuf,
    registry: SharedRegistry,
    /// taskId -> last persisted messages index
    cursors: std::sync::Mutex<HashMap<String, usize>>,
    /// taskId -> date dir; mirrors index.jsonl, last write wins
    index: tokio::sync::Mutex<Option<HashMap<String, String>>>,
    /// Serializes pending.json read-modify-write cycles
    pending_lock: tokio::sync::Mutex<()>,
}

impl TaskPersister {
    pub fn new(data_root: impl Into<PathBuf>, registry: SharedRegistry) -> Self {
        Self {
            data_root: data_root.into(),
            registry,
            cursors: std::sync::Mutex::new(HashMap::new()),
            index: tokio::sync::Mutex::new(None),
            pending_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Subscribe to every event that mutates a task
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        for event_type in [
            EventType::TaskCreated,
            EventType::ReasonDone,
            EventType::ToolCallCompleted,
            EventType::ToolCallFailed,
            EventType::StepCompleted,
            EventType::NeedMoreInfo,
            EventType::TaskSuspended,
            EventType::TaskResumed,
            EventType::TaskCompleted,
            EventType::TaskFailed,
        ] {
            bus.subscribe(event_type, Arc::clone(self) as Arc<dyn EventHandler>);
        }
    }

    fn tasks_dir(&self) -> PathBuf {
        self.data_root.join("tasks")
    }

    fn index_path(&self) -> PathBuf {
        self.tasks_dir().join("index.jsonl")
    }

    fn pending_path(&self) -> PathBuf {
        self.tasks_dir().join("pending.json")
    }

    /// All indexed tasks as (task_id, date) pairs, last write wins
    pub async fn list_tasks(&self) -> Vec<(String, String)> {
        let index = self.load_index().await;
        let mut tasks: Vec<(String, String)> = index.into_iter().collect();
        tasks.sort();
        tasks
    }

    /// Resolve a task's JSONL path through the index
    pub async fn resolve_task_path(&self, task_id: &str) -> Option<PathBuf> {
        let index = self.load_index().await;
        index
            .get(task_id)
            .map(|date| self.tasks_dir().join(date).join(format!("{}.jsonl", task_id)))
    }

    async fn load_index(&self) -> HashMap<String, String> {
        let mut cached = self.index.lock().await;
        if let Some(index) = cached.as_ref() {
            return index.clone();
        }
        let mut index = HashMap::new();
        if let Ok(content) = fs::read_to_string(self.index_path()).await {
            for line in content.lines() {
                if let Ok(entry) = serde_json::from_str::<IndexEntry>(line) {
                    index.insert(entry.task_id, entry.date);
                }
            }
        }
        *cached = Some(index.clone());
        index
    }

    async fn index_task(&self, task_id: &str, date: &str) -> Result<()> {
        {
            let mut cached = self.index.lock().await;
            cached
                .get_or_insert_with(HashMap::new)
                .insert(task_id.to_string(), date.to_string());
        }
        let entry = IndexEntry {
            task_id: task_id.to_string(),
            date: date.to_string(),
        };
        let line = serde_json::to_string(&entry)? + "\n";
        append_line(&self.index_path(), &line).await
    }

    /// Append one record to a task's log, creating directories as needed
    async fn append_record(&self, record: &LogRecord) -> Result<()> {
        let index = self.load_index().await;
        let date = match index.get(&record.task_id) {
            Some(date) => date.clone(),
            None => {
                // First record for this task: today's directory
                let date = Utc::now().format("%Y-%m-%d").to_string();
                self.index_task(&record.task_id, &date).await?;
                date
            }
        };

        let dir = self.tasks_dir().join(&date);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.jsonl", record.task_id));
        let line = serde_json::to_string(record)? + "\n";
        append_line(&path, &line).await
    }

    // === pending.json ===

    /// Current pending entries
    pub async fn pending_tasks(&self) -> Result<Vec<PendingEntry>> {
        let _guard = self.pending_lock.lock().await;
        self.read_pending().await
    }

    async fn read_pending(&self) -> Result<Vec<PendingEntry>> {
        match fs::read_to_string(self.pending_path()).await {
            Ok(content) => Ok(serde_json::from_str(&content).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic rewrite: temp file + rename so readers never see partial JSON
    async fn write_pending(&self, entries: &[PendingEntry]) -> Result<()> {
        fs::create_dir_all(self.tasks_dir()).await?;
        let path = self.pending_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(entries)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn pending_add(&self, task_id: &str) -> Result<()> {
        let _guard = self.pending_lock.lock().await;
        let mut entries = self.read_pending().await?;
        if !entries.iter().any(|e| e.task_id == task_id) {
            entries.push(PendingEntry {
                task_id: task_id.to_string(),
                ts: Utc::now().timestamp_millis(),
            });
        }
        self.write_pending(&entries).await
    }

    async fn pending_remove(&self, task_id: &str) -> Result<()> {
        let _guard = self.pending_lock.lock().await;
        let mut entries = self.read_pending().await?;
        entries.retain(|e| e.task_id != task_id);
        self.write_pending(&entries).await
    }

    // === crash recovery ===

    /// Force-fail every task left pending by a previous process
    ///
    /// Appends a TASK_FAILED record to each survivor's log, clears
    /// pending.json, and returns the affected task IDs so the caller can
    /// fire failure notifications.
    pub async fn recover(&self) -> Result<Vec<String>> {
        let entries = self.pending_tasks().await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut recovered = Vec::with_capacity(entries.len());
        for entry in &entries {
            warn!(task_id = %entry.task_id, "crash recovery: force-failing pending task");
            let record = LogRecord::new(
                EventType::TaskFailed.as_str(),
                &entry.task_id,
                json!({"error": CRASH_RECOVERY_ERROR}),
            );
            if let Err(e) = self.append_record(&record).await {
                warn!(task_id = %entry.task_id, error = %e, "failed to append recovery record");
            }
            recovered.push(entry.task_id.clone());
        }

        {
            let _guard = self.pending_lock.lock().await;
            self.write_pending(&[]).await?;
        }
        Ok(recovered)
    }

    // === delta construction ===

    async fn persist_event(&self, event: &Event) -> Result<()> {
        let Some(task_id) = event.task_id.as_deref() else {
            debug!(event_type = %event.event_type, "persister: event without task id, skipping");
            return Ok(());
        };
        if !self.registry.lock().await.contains(task_id) {
            // Recovery appends its own TASK_FAILED lines without going
            // through the bus, so an unregistered task here is a stray.
            debug!(%task_id, event_type = %event.event_type, "persister: unknown task, skipping");
            return Ok(());
        }

        let data = self.delta_for(task_id, event).await;
        let record = LogRecord::new(event.event_type.as_str(), task_id, data);
        self.append_record(&record).await?;

        match event.event_type {
            EventType::TaskCreated | EventType::TaskResumed => self.pending_add(task_id).await?,
            EventType::TaskCompleted | EventType::TaskFailed => self.pending_remove(task_id).await?,
            _ => {}
        }
        Ok(())
    }

    /// Build the minimum delta for this event from the owning task's context
    async fn delta_for(&self, task_id: &str, event: &Event) -> Value {
        let registry = self.registry.lock().await;
        let task = registry.get(task_id);

        let mut new_messages = Value::Array(Vec::new());
        let mut reasoning = Value::Null;
        let mut plan = Value::Null;
        let mut last_action = Value::Null;
        if let Some(task) = task {
            let ctx = &task.context;
            let mut cursors = self.cursors.lock().expect("cursors poisoned");
            let cursor = cursors.entry(task_id.to_string()).or_insert(0);
            match event.event_type {
                EventType::TaskCreated | EventType::TaskResumed => {
                    // Creation input / resume input are carried explicitly;
                    // the cursor skips past them.
                    *cursor = ctx.messages.len();
                }
                EventType::ReasonDone
                | EventType::ToolCallCompleted
                | EventType::ToolCallFailed
                | EventType::TaskSuspended
                | EventType::TaskCompleted => {
                    let start = (*cursor).min(ctx.messages.len());
                    new_messages = serde_json::to_value(&ctx.messages[start..]).unwrap_or_default();
                    *cursor = ctx.messages.len();
                }
                _ => {}
            }
            reasoning = ctx.reasoning.clone();
            plan = serde_json::to_value(&ctx.plan).unwrap_or(Value::Null);
            last_action = serde_json::to_value(ctx.actions_done.last()).unwrap_or(Value::Null);
        }

        match event.event_type {
            EventType::TaskCreated => {
                let ctx = task.map(|t| &t.context);
                json!({
                    "inputText": ctx.map(|c| c.input_text.clone()).unwrap_or_default(),
                    "source": ctx.map(|c| c.source.clone()).unwrap_or_default(),
                    "inputMetadata": ctx.map(|c| c.input_metadata.clone()).unwrap_or(Value::Null),
                    "taskType": ctx.map(|c| c.task_type.clone()).unwrap_or_default(),
                    "description": ctx.map(|c| c.description.clone()).unwrap_or_default(),
                })
            }
            EventType::ReasonDone => json!({
                "reasoning": reasoning,
                "plan": plan,
                "newMessages": new_messages,
            }),
            EventType::ToolCallCompleted | EventType::ToolCallFailed => json!({
                "newMessages": new_messages,
                "action": last_action,
            }),
            EventType::StepCompleted => json!({
                "actionsCount": task.map(|t| t.context.actions_done.len()).unwrap_or(0),
                "action": last_action,
            }),
            EventType::NeedMoreInfo => json!({"reasoning": reasoning}),
            EventType::TaskSuspended => {
                let ctx = task.map(|t| &t.context);
                json!({
                    "suspendedState": ctx.and_then(|c| c.suspended_state),
                    "suspendReason": ctx.and_then(|c| c.suspend_reason.clone()),
                    "reasoning": reasoning,
                    "plan": plan,
                    "newMessages": new_messages,
                })
            }
            EventType::TaskResumed => json!({
                "newInput": event.payload.get("newInput").cloned().unwrap_or(Value::Null),
                "previousState": event
                    .payload
                    .get("previousState")
                    .cloned()
                    .unwrap_or_else(|| serde_json::to_value(TaskState::Completed).unwrap_or(Value::Null)),
            }),
            EventType::TaskCompleted => json!({
                "finalResult": task.and_then(|t| t.context.final_result.clone()).unwrap_or(Value::Null),
                "iterations": task.map(|t| t.context.iteration).unwrap_or(0),
                "newMessages": new_messages,
            }),
            EventType::TaskFailed => {
                let error = task
                    .and_then(|t| t.context.error.clone())
                    .or_else(|| event.payload.get("error").and_then(|e| e.as_str()).map(String::from));
                json!({"error": error})
            }
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl EventHandler for TaskPersister {
    fn name(&self) -> &str {
        "task-persister"
    }

    async fn handle(&self, event: Event) -> Result<()> {
        if let Err(e) = self.persist_event(&event).await {
            // Persistence failure must not block the triggering event
            warn!(event_type = %event.event_type, error = %e, "persister write failed");
        }
        Ok(())
    }
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskContext, TaskFsm, TaskRegistry};
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    fn registry_with(task_id: &str) -> SharedRegistry {
        let mut registry = TaskRegistry::new(10);
        registry
            .insert(TaskFsm::new(TaskContext::new(
                task_id,
                "hello",
                "test",
                "general",
                "a task",
                Value::Null,
            )))
            .unwrap();
        Arc::new(Mutex::new(registry))
    }

    async fn read_log(persister: &TaskPersister, task_id: &str) -> Vec<LogRecord> {
        let path = persister.resolve_task_path(task_id).await.unwrap();
        let content = fs::read_to_string(path).await.unwrap();
        content
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    #[tokio::test]
    async fn test_task_created_writes_log_index_pending() {
        let temp = tempdir().unwrap();
        let registry = registry_with("task-1");
        let persister = TaskPersister::new(temp.path(), registry);

        let event = Event::new(EventType::TaskCreated, "agent").with_task("task-1");
        persister.persist_event(&event).await.unwrap();

        let records = read_log(&persister, "task-1").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, "TASK_CREATED");
        assert_eq!(records[0].data["inputText"], "hello");
        assert_eq!(records[0].data["taskType"], "general");

        let pending = persister.pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, "task-1");
    }

    #[tokio::test]
    async fn test_message_cursor_only_ships_new_messages() {
        let temp = tempdir().unwrap();
        let registry = registry_with("task-1");
        let persister = TaskPersister::new(temp.path(), registry.clone());

        persister
            .persist_event(&Event::new(EventType::TaskCreated, "agent").with_task("task-1"))
            .await
            .unwrap();

        {
            let mut reg = registry.lock().await;
            let task = reg.get_mut("task-1").unwrap();
            task.context.push_message(crate::llm::ChatMessage::assistant("thinking"));
            task.context.reasoning = json!({"thought": "plan it"});
        }
        persister
            .persist_event(&Event::new(EventType::ReasonDone, "agent").with_task("task-1"))
            .await
            .unwrap();

        {
            let mut reg = registry.lock().await;
            let task = reg.get_mut("task-1").unwrap();
            task.context.push_message(crate::llm::ChatMessage::tool("result", "c1"));
        }
        persister
            .persist_event(&Event::new(EventType::ToolCallCompleted, "agent").with_task("task-1"))
            .await
            .unwrap();

        let records = read_log(&persister, "task-1").await;
        // REASON_DONE only carries the assistant message, not the creation input
        let reason = &records[1];
        assert_eq!(reason.data["newMessages"].as_array().unwrap().len(), 1);
        assert_eq!(reason.data["newMessages"][0]["content"], "thinking");
        // TOOL_CALL_COMPLETED only carries the tool message
        let tool = &records[2];
        assert_eq!(tool.data["newMessages"].as_array().unwrap().len(), 1);
        assert_eq!(tool.data["newMessages"][0]["content"], "result");
    }

    #[tokio::test]
    async fn test_completion_removes_from_pending() {
        let temp = tempdir().unwrap();
        let registry = registry_with("task-1");
        let persister = TaskPersister::new(temp.path(), registry.clone());

        persister
            .persist_event(&Event::new(EventType::TaskCreated, "agent").with_task("task-1"))
            .await
            .unwrap();
        assert_eq!(persister.pending_tasks().await.unwrap().len(), 1);

        {
            let mut reg = registry.lock().await;
            reg.get_mut("task-1").unwrap().context.final_result = Some(json!({"response": "done"}));
        }
        persister
            .persist_event(&Event::new(EventType::TaskCompleted, "agent").with_task("task-1"))
            .await
            .unwrap();
        assert!(persister.pending_tasks().await.unwrap().is_empty());

        let records = read_log(&persister, "task-1").await;
        assert_eq!(records.last().unwrap().data["finalResult"]["response"], "done");
    }

    #[tokio::test]
    async fn test_crash_recovery_force_fails_pending() {
        let temp = tempdir().unwrap();
        let registry = registry_with("task-1");
        let persister = TaskPersister::new(temp.path(), registry);

        persister
            .persist_event(&Event::new(EventType::TaskCreated, "agent").with_task("task-1"))
            .await
            .unwrap();

        let recovered = persister.recover().await.unwrap();
        assert_eq!(recovered, vec!["task-1".to_string()]);
        assert!(persister.pending_tasks().await.unwrap().is_empty());

        let records = read_log(&persister, "task-1").await;
        let last = records.last().unwrap();
        assert_eq!(last.event, "TASK_FAILED");
        assert_eq!(last.data["error"], CRASH_RECOVERY_ERROR);

        // Second recovery is a no-op
        assert!(persister.recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_re_adds_pending_and_persists_input() {
        let temp = tempdir().unwrap();
        let registry = registry_with("task-1");
        let persister = TaskPersister::new(temp.path(), registry);

        persister
            .persist_event(&Event::new(EventType::TaskCreated, "agent").with_task("task-1"))
            .await
            .unwrap();
        persister
            .persist_event(&Event::new(EventType::TaskCompleted, "agent").with_task("task-1"))
            .await
            .unwrap();
        assert!(persister.pending_tasks().await.unwrap().is_empty());

        let resume = Event::new(EventType::TaskResumed, "agent")
            .with_task("task-1")
            .with_payload(json!({"newInput": "follow up", "previousState": "COMPLETED"}));
        persister.persist_event(&resume).await.unwrap();

        assert_eq!(persister.pending_tasks().await.unwrap().len(), 1);
        let records = read_log(&persister, "task-1").await;
        let last = records.last().unwrap();
        assert_eq!(last.event, "TASK_RESUMED");
        assert_eq!(last.data["newInput"], "follow up");
        assert_eq!(last.data["previousState"], "COMPLETED");
    }

    #[tokio::test]
    async fn test_resolve_unknown_task() {
        let temp = tempdir().unwrap();
        let registry = Arc::new(Mutex::new(TaskRegistry::new(10)));
        let persister = TaskPersister::new(temp.path(), registry);
        assert!(persister.resolve_task_path("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_pending_file_is_valid_json_array() {
        let temp = tempdir().unwrap();
        let registry = registry_with("task-1");
        let persister = TaskPersister::new(temp.path(), registry);

        persister
            .persist_event(&Event::new(EventType::TaskCreated, "agent").with_task("task-1"))
            .await
            .unwrap();

        let content = fs::read_to_string(persister.pending_path()).await.unwrap();
        let parsed: Vec<PendingEntry> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_event_reads_error_from_context() {
        let temp = tempdir().unwrap();
        let registry = registry_with("task-1");
        {
            let mut reg = registry.lock().await;
            reg.get_mut("task-1").unwrap().context.error = Some("Max cognitive iterations exceeded (3)".to_string());
        }
        let persister = TaskPersister::new(temp.path(), registry);

        persister
            .persist_event(&Event::new(EventType::TaskCreated, "agent").with_task("task-1"))
            .await
            .unwrap();
        persister
            .persist_event(&Event::new(EventType::TaskFailed, "agent").with_task("task-1"))
            .await
            .unwrap();

        let records = read_log(&persister, "task-1").await;
        assert_eq!(records.last().unwrap().data["error"], "Max cognitive iterations exceeded (3)");
    }
}
