//! Agent - the stateless event processor
//!
//! Translates bus events into FSM transitions and spawns the cognitive work
//! for the resulting state. The agent owns no per-task state of its own:
//! everything lives in the task registry, which is why a crash loses nothing
//! the persister has not already captured.
//!
//! Concurrency: the FSM transition happens synchronously inside the bus
//! handler (the bus's single consumer serializes them); the reasoning and
//! tool stages are spawned, tracked, and awaited on stop. Two semaphores
//! bound concurrent LLM calls and concurrent tool executions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use eyre::Result;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, Config};
use crate::events::{Event, EventBus, EventHandler, EventType};
use crate::ids;
use crate::llm::ChatMessage;
use crate::persist::{self, CRASH_RECOVERY_ERROR, TaskPersister};
use crate::task::{ActionRecord, ActionType, PlanStep, SharedRegistry, TaskContext, TaskFsm, TaskState};
use crate::tools::{ToolContext, ToolExecutor, ToolResult};

use super::cognition::{ReflectionGate, Reflector, ThinkDecision, Thinker};
use super::subagent::{DEFAULT_TASK_TYPE, SubagentRegistry};

/// Terminal notification delivered to the registered consumer
#[derive(Debug, Clone)]
pub enum TaskNotification {
    Completed { task_id: String, result: Value },
    Failed { task_id: String, error: String },
    Notify { task_id: String, message: String },
}

impl TaskNotification {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Completed { task_id, .. } | Self::Failed { task_id, .. } | Self::Notify { task_id, .. } => task_id,
        }
    }
}

/// Single registered notification consumer
pub type NotifyCallback = Arc<dyn Fn(TaskNotification) + Send + Sync>;

/// The event processor driving tasks through their cognitive stages
pub struct Agent {
    bus: Arc<EventBus>,
    registry: SharedRegistry,
    persister: Arc<TaskPersister>,
    thinker: Arc<dyn Thinker>,
    reflector: Option<Arc<dyn Reflector>>,
    executor: Arc<ToolExecutor>,
    subagents: SubagentRegistry,
    gate: ReflectionGate,
    llm_gate: Arc<Semaphore>,
    tool_gate: Arc<Semaphore>,
    inflight: std::sync::Mutex<Vec<JoinHandle<()>>>,
    notify: std::sync::Mutex<Option<NotifyCallback>>,
    running: AtomicBool,
    config: AgentConfig,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        registry: SharedRegistry,
        persister: Arc<TaskPersister>,
        thinker: Arc<dyn Thinker>,
        executor: Arc<ToolExecutor>,
        subagents: SubagentRegistry,
        config: &Config,
    ) -> Self {
        Self {
            bus,
            registry,
            persister,
            thinker,
            reflector: None,
            executor,
            subagents,
            gate: ReflectionGate::default(),
            llm_gate: Arc::new(Semaphore::new(config.llm.max_concurrent_calls.max(1))),
            tool_gate: Arc::new(Semaphore::new(config.agent.max_concurrent_tools.max(1))),
            inflight: std::sync::Mutex::new(Vec::new()),
            notify: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            config: config.agent.clone(),
        }
    }

    /// Attach a post-task reflector
    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    /// Run crash recovery, then subscribe to the bus
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        // Any task left pending by a previous process is observably resolved
        // before new work begins.
        let recovered = self.persister.recover().await?;
        for task_id in recovered {
            self.deliver(TaskNotification::Failed {
                task_id,
                error: CRASH_RECOVERY_ERROR.to_string(),
            });
        }

        self.running.store(true, Ordering::SeqCst);

        let handler: Arc<dyn EventHandler> = Arc::new(AgentHandler(Arc::clone(self)));
        for event_type in [
            EventType::MessageReceived,
            EventType::ScheduleTriggered,
            EventType::WebhookReceived,
            EventType::TaskCreated,
            EventType::ReasonDone,
            EventType::NeedMoreInfo,
            EventType::StepCompleted,
            EventType::ToolCallCompleted,
            EventType::ToolCallFailed,
            EventType::TaskSuspended,
            EventType::TaskResumed,
            EventType::TaskFailed,
        ] {
            self.bus.subscribe(event_type, Arc::clone(&handler));
        }

        info!("agent started");
        Ok(())
    }

    /// Stop accepting events and await all in-flight cognitive work
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut inflight = self.inflight.lock().expect("inflight poisoned");
                inflight.drain(..).collect()
            };
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
        info!("agent stopped");
    }

    /// Register the single terminal-notification consumer
    pub fn on_notify(&self, callback: NotifyCallback) {
        *self.notify.lock().expect("notify poisoned") = Some(callback);
    }

    /// Submit new work; returns the created task's ID
    ///
    /// The task ID is observed by watching the bus history for the
    /// TASK_CREATED event whose parent is our MESSAGE_RECEIVED.
    pub async fn submit(
        &self,
        text: impl Into<String>,
        source: impl Into<String>,
        task_type: Option<String>,
        description: Option<String>,
    ) -> Result<String> {
        let text = text.into();
        let event = Event::new(EventType::MessageReceived, source).with_payload(json!({
            "text": text,
            "taskType": task_type,
            "description": description,
        }));
        let message_id = event.id.clone();
        self.bus.emit(event);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.task_timeout.max(1));
        loop {
            let created = self.bus.history().into_iter().find(|e| {
                e.event_type == EventType::TaskCreated && e.parent_event_id.as_deref() == Some(message_id.as_str())
            });
            if let Some(created) = created {
                return created
                    .task_id
                    .ok_or_else(|| eyre::eyre!("TASK_CREATED event missing task id"));
            }
            if tokio::time::Instant::now() >= deadline {
                eyre::bail!("timed out waiting for task creation");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Resume a COMPLETED task with new input
    ///
    /// If the task is no longer in the registry it is hydrated from its
    /// JSONL log. Messages and executed actions are preserved across the
    /// resume; cognitive state is cleared.
    pub async fn resume(&self, task_id: &str, new_input: impl Into<String>) -> Result<()> {
        let present = { self.registry.lock().await.contains(task_id) };

        if !present {
            let path = self
                .persister
                .resolve_task_path(task_id)
                .await
                .ok_or_else(|| eyre::eyre!("task {} not found", task_id))?;
            let records = persist::read_records(&path).await?;
            let state = persist::terminal_state(&records)
                .ok_or_else(|| eyre::eyre!("task {} has an empty or unreadable log", task_id))?;
            match state {
                TaskState::Completed => {}
                TaskState::Failed => eyre::bail!("task {} has failed and cannot be resumed", task_id),
                other => eyre::bail!("task {} is {} in its log, only COMPLETED tasks resume", task_id, other),
            }
            let context = persist::fold(&records)?;
            let fsm = TaskFsm::hydrated(context, TaskState::Completed);
            self.registry
                .lock()
                .await
                .insert(fsm)
                .map_err(|e| eyre::eyre!("hydration race: {}", e))?;
            debug!(%task_id, "hydrated task from JSONL log");
        }

        let new_input = new_input.into();
        {
            let mut registry = self.registry.lock().await;
            let task = registry
                .get_mut(task_id)
                .ok_or_else(|| eyre::eyre!("task {} not found", task_id))?;
            if task.state != TaskState::Completed {
                eyre::bail!("task {} is {}, only COMPLETED tasks can be resumed", task_id, task.state);
            }
            task.context.clear_cognitive_state();
            task.context.push_message(ChatMessage::user(new_input.clone()));
        }

        self.bus.emit(
            Event::new(EventType::TaskResumed, "agent")
                .with_task(task_id)
                .with_payload(json!({
                    "newInput": new_input,
                    "previousState": TaskState::Completed,
                })),
        );
        Ok(())
    }

    // === event handling ===

    async fn handle_event(self: &Arc<Self>, event: Event) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if event.event_type.is_external_input() && event.task_id.is_none() {
            self.create_task(event).await;
        } else {
            self.advance_task(event).await;
        }
        Ok(())
    }

    /// External input without a task: construct a context, register, emit
    /// TASK_CREATED
    async fn create_task(self: &Arc<Self>, event: Event) {
        let text = event
            .payload
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let task_type = event
            .payload
            .get("taskType")
            .and_then(|t| t.as_str())
            .unwrap_or(DEFAULT_TASK_TYPE)
            .to_string();
        let description = event
            .payload
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string();
        let metadata = event.payload.get("metadata").cloned().unwrap_or(Value::Null);

        let task_id = ids::task_id();
        let context = TaskContext::new(&task_id, text, event.source.clone(), task_type.clone(), description, metadata);

        {
            let mut registry = self.registry.lock().await;
            if let Err(e) = registry.insert(TaskFsm::new(context)) {
                warn!(error = %e, "task registration rejected");
                return;
            }
        }

        debug!(%task_id, %task_type, "task created");
        self.bus.emit(
            Event::new(EventType::TaskCreated, "agent")
                .with_task(&task_id)
                .with_parent(event.id)
                .with_payload(json!({"taskType": task_type})),
        );
    }

    /// Task-scoped event: look up, transition, dispatch
    async fn advance_task(self: &Arc<Self>, event: Event) {
        let Some(task_id) = event.task_id.clone() else {
            debug!(event_type = %event.event_type, "task event without task id, dropping");
            return;
        };

        let new_state = {
            let mut registry = self.registry.lock().await;
            let Some(task) = registry.get_mut(&task_id) else {
                warn!(%task_id, event_type = %event.event_type, "event for unknown task, dropping");
                return;
            };

            // A user message aimed at a suspended task joins its context
            // before the transition wakes it.
            if event.event_type == EventType::MessageReceived
                && let Some(text) = event.payload.get("text").and_then(|t| t.as_str())
            {
                task.context.push_message(ChatMessage::user(text));
            }

            match task.apply(&event) {
                Ok(state) => state,
                Err(e) => {
                    warn!(%task_id, error = %e, "dropping event");
                    return;
                }
            }
        };

        debug!(%task_id, state = %new_state, trigger = %event.event_type, "task advanced");
        self.dispatch(new_state, task_id).await;
    }

    /// Spawn or run the cognitive work for the state just entered
    async fn dispatch(self: &Arc<Self>, state: TaskState, task_id: String) {
        match state {
            TaskState::Reasoning => {
                let agent = Arc::clone(self);
                self.track(tokio::spawn(async move {
                    if let Err(e) = agent.run_reason(&task_id).await {
                        warn!(%task_id, error = %e, "reasoning stage failed");
                        agent.force_fail(&task_id, e.to_string()).await;
                    }
                }));
            }
            TaskState::Acting => self.run_act(task_id).await,
            TaskState::Suspended => {
                debug!(%task_id, "task suspended, awaiting input");
            }
            TaskState::Completed => self.finalize(&task_id).await,
            TaskState::Failed => self.notify_failed(&task_id).await,
            TaskState::Idle => {}
        }
    }

    // === cognitive stages ===

    /// REASONING: guard the iteration budget, run the Thinker, integrate
    async fn run_reason(self: &Arc<Self>, task_id: &str) -> Result<()> {
        let max = self.config.max_cognitive_iterations;
        let (snapshot, tools) = {
            let mut registry = self.registry.lock().await;
            let task = registry
                .get_mut(task_id)
                .ok_or_else(|| eyre::eyre!("task {} vanished before reasoning", task_id))?;

            task.context.iteration += 1;
            if task.context.iteration > max {
                let error = format!("Max cognitive iterations exceeded ({})", max);
                task.context.error = Some(error.clone());
                drop(registry);
                self.bus.emit(
                    Event::new(EventType::TaskFailed, "agent")
                        .with_task(task_id)
                        .with_payload(json!({"error": error})),
                );
                return Ok(());
            }

            let allowed = self.subagents.allowed_tools(&task.context.task_type);
            let tools = self.executor.definitions_for(allowed.as_deref());
            (task.context.clone(), tools)
        };

        let outcome = {
            let _permit = self.llm_gate.acquire().await?;
            self.thinker.think(&snapshot, &tools).await?
        };

        let event = {
            let mut registry = self.registry.lock().await;
            let task = registry
                .get_mut(task_id)
                .ok_or_else(|| eyre::eyre!("task {} vanished during reasoning", task_id))?;

            if let Some(text) = outcome.assistant_text {
                task.context.push_message(ChatMessage::assistant(text));
            }
            task.context.reasoning = outcome.reasoning;

            match outcome.decision {
                ThinkDecision::Plan(plan) => {
                    task.context.plan = Some(plan);
                    Event::new(EventType::ReasonDone, "agent").with_task(task_id)
                }
                ThinkDecision::NeedMoreInfo { question } => {
                    task.context.suspend_reason = Some(question.clone());
                    Event::new(EventType::NeedMoreInfo, "agent")
                        .with_task(task_id)
                        .with_payload(json!({"question": question}))
                }
            }
        };
        self.bus.emit(event);
        Ok(())
    }

    /// ACTING: run the current plan step, if any
    async fn run_act(self: &Arc<Self>, task_id: String) {
        let step = {
            let registry = self.registry.lock().await;
            let Some(task) = registry.get(&task_id) else {
                warn!(%task_id, "task vanished before acting");
                return;
            };
            task.context.current_step().cloned()
        };

        let Some(step) = step else {
            debug!(%task_id, "no pending step");
            return;
        };

        match step.action_type {
            ActionType::ToolCall => {
                let agent = Arc::clone(self);
                self.track(tokio::spawn(async move {
                    if let Err(e) = agent.run_tool_step(&task_id, step).await {
                        warn!(%task_id, error = %e, "tool stage failed");
                        agent.force_fail(&task_id, e.to_string()).await;
                    }
                }));
            }
            ActionType::Respond | ActionType::Stub => {
                if let Err(e) = self.run_sync_step(&task_id, step).await {
                    warn!(%task_id, error = %e, "step failed");
                    self.force_fail(&task_id, e.to_string()).await;
                }
            }
        }
    }

    /// Respond/stub steps are recorded synchronously within the handler
    async fn run_sync_step(&self, task_id: &str, step: PlanStep) -> Result<()> {
        let now = Utc::now();
        let result = match step.action_type {
            ActionType::Respond => {
                let text = step
                    .action_params
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or(&step.description)
                    .to_string();
                json!({"text": text})
            }
            _ => json!({}),
        };

        {
            let mut registry = self.registry.lock().await;
            let task = registry
                .get_mut(task_id)
                .ok_or_else(|| eyre::eyre!("task {} vanished during step", task_id))?;
            task.context.record_action(ActionRecord {
                step_index: step.index,
                action_type: step.action_type,
                description: step.description.clone(),
                result,
                started_at: now,
                completed_at: Utc::now(),
                duration_ms: 0,
            });
            task.context.mark_step_done(step.index)?;
        }

        self.bus.emit(
            Event::new(EventType::StepCompleted, "agent")
                .with_task(task_id)
                .with_payload(json!({"stepIndex": step.index})),
        );
        Ok(())
    }

    /// Tool steps: gate by task type, execute, update context, then emit the
    /// completion
    async fn run_tool_step(self: &Arc<Self>, task_id: &str, step: PlanStep) -> Result<()> {
        let task_type = {
            let registry = self.registry.lock().await;
            registry
                .get(task_id)
                .map(|t| t.context.task_type.clone())
                .ok_or_else(|| eyre::eyre!("task {} vanished before tool call", task_id))?
        };

        let tool_name = step
            .action_params
            .get("tool")
            .and_then(|t| t.as_str())
            .ok_or_else(|| eyre::eyre!("tool_call step {} has no tool name", step.index))?
            .to_string();
        let params = step.action_params.get("params").cloned().unwrap_or_else(|| json!({}));

        let result = if !self.subagents.is_tool_allowed(&task_type, &tool_name) {
            // Synthetic failure, same shape as an execution error: the LLM
            // sees it on the next round. This is the prompt-injection net.
            warn!(%task_id, tool = %tool_name, %task_type, "blocked tool call");
            ToolResult::failure(
                format!("Tool '{}' is not permitted for task type '{}'", tool_name, task_type),
                Utc::now(),
            )
        } else {
            let _permit = self.tool_gate.acquire().await?;
            let ctx = ToolContext::new(task_id, &task_type, "agent");
            self.executor.execute(&tool_name, params, &ctx, None).await
        };

        // Context updates land before the completion event so the FSM never
        // observes a completion the context does not reflect.
        {
            let mut registry = self.registry.lock().await;
            let task = registry
                .get_mut(task_id)
                .ok_or_else(|| eyre::eyre!("task {} vanished during tool call", task_id))?;
            task.context.push_message(ChatMessage::tool(
                result.to_message_content(),
                format!("{}-step{}", task_id, step.index),
            ));
            task.context.record_action(ActionRecord {
                step_index: step.index,
                action_type: ActionType::ToolCall,
                description: step.description.clone(),
                result: serde_json::to_value(&result).unwrap_or(Value::Null),
                started_at: result.started_at,
                completed_at: result.completed_at,
                duration_ms: result.duration_ms,
            });
            task.context.mark_step_done(step.index)?;
        }

        self.executor.emit_completion(task_id, &tool_name, step.index, &result);
        Ok(())
    }

    /// COMPLETED: compile the result, notify, maybe reflect
    async fn finalize(self: &Arc<Self>, task_id: &str) {
        let compiled = {
            let mut registry = self.registry.lock().await;
            let Some(task) = registry.get_mut(task_id) else {
                warn!(%task_id, "completed task vanished");
                return;
            };
            let result = json!({
                "response": task.context.response_text().unwrap_or_default(),
                "iterations": task.context.iteration,
                "actions": task.context.actions_done.len(),
            });
            task.context.final_result = Some(result.clone());
            let reflect = self.gate.should_reflect(&task.context);
            (result, reflect, task.context.clone())
        };
        let (result, should_reflect, snapshot) = compiled;

        self.bus
            .emit(Event::new(EventType::TaskCompleted, "agent").with_task(task_id));
        self.deliver(TaskNotification::Completed {
            task_id: task_id.to_string(),
            result,
        });

        if should_reflect && let Some(reflector) = self.reflector.clone() {
            let agent = Arc::clone(self);
            let task_id = task_id.to_string();
            // Fire-and-forget, but tracked so stop() can drain it
            self.track(tokio::spawn(async move {
                match reflector.reflect(&snapshot).await {
                    Ok(Some(reflection)) => {
                        let mut registry = agent.registry.lock().await;
                        if let Some(task) = registry.get_mut(&task_id) {
                            task.context.post_reflection = Some(reflection);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(%task_id, error = %e, "reflection failed"),
                }
            }));
        }
    }

    /// FAILED: notify the consumer with the recorded error
    async fn notify_failed(&self, task_id: &str) {
        let error = {
            let registry = self.registry.lock().await;
            registry
                .get(task_id)
                .and_then(|t| t.context.error.clone())
                .unwrap_or_else(|| "task failed".to_string())
        };
        self.deliver(TaskNotification::Failed {
            task_id: task_id.to_string(),
            error,
        });
    }

    /// Spawn-boundary catch: force a non-terminal task to FAILED
    async fn force_fail(&self, task_id: &str, error: String) {
        {
            let mut registry = self.registry.lock().await;
            let Some(task) = registry.get_mut(task_id) else { return };
            if task.state.is_terminal() {
                return;
            }
            task.context.error = Some(error.clone());
        }
        self.bus.emit(
            Event::new(EventType::TaskFailed, "agent")
                .with_task(task_id)
                .with_payload(json!({"error": error})),
        );
    }

    fn deliver(&self, notification: TaskNotification) {
        let callback = self.notify.lock().expect("notify poisoned").clone();
        if let Some(callback) = callback {
            callback(notification);
        } else {
            debug!(task_id = %notification.task_id(), "no notification consumer registered");
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut inflight = self.inflight.lock().expect("inflight poisoned");
        inflight.retain(|h| !h.is_finished());
        inflight.push(handle);
    }
}

/// Adapter giving bus subscriptions an owned Arc of the agent
struct AgentHandler(Arc<Agent>);

#[async_trait]
impl EventHandler for AgentHandler {
    fn name(&self) -> &str {
        "agent"
    }

    async fn handle(&self, event: Event) -> Result<()> {
        self.0.handle_event(event).await
    }
}
