//! Conversation orchestrator - the user-facing inner-monologue loop
//!
//! A single worker drains the inbound queue serially, so at most one think
//! step is ever in flight. The model's plain text is private; only the
//! `reply` tool delivers a user-visible message. `reply` and `spawn_subagent`
//! results are terminal for the turn; every other tool result queues another
//! think so the model can integrate it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{Agent, TaskNotification};
use crate::config::{Config, LlmConfig, SessionConfig};
use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmError, ToolCallRequest, estimate_messages_tokens};

use super::convo::{ChannelSink, OutboundMessage, conversation_tool_definitions, is_terminal_tool};
use super::prompt::{REFLECTION_PROMPT, SUMMARIZER_PROMPT, render_system_prompt};
use super::session::SessionStore;
use super::skills::{SkillMode, SkillRegistry};

/// Where an inbound message came from and where replies default to
#[derive(Debug, Clone)]
pub struct ChannelRef {
    pub channel_type: Option<String>,
    pub channel_id: String,
}

/// Inbound queue items
#[derive(Debug)]
pub enum QueueItem {
    Message { text: String, channel: ChannelRef },
    TaskNotify(TaskNotification),
    Think,
    Shutdown,
}

/// Minimum archived-session substance for the post-compaction reflection
pub fn reflection_gate(messages: &[ChatMessage]) -> bool {
    let users = messages.iter().filter(|m| m.role == crate::llm::Role::User).count();
    messages.len() >= 6 && users >= 2
}

struct Inner {
    agent: Arc<Agent>,
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ChannelSink>,
    session: SessionStore,
    skills: SkillRegistry,
    /// Built once on start for provider cache friendliness
    system_prompt: String,
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    last_prompt_tokens: AtomicU64,
    current_channel: tokio::sync::Mutex<Option<ChannelRef>>,
    llm_config: LlmConfig,
    session_config: SessionConfig,
    data_dir: PathBuf,
}

/// The outer conversation loop
pub struct Orchestrator {
    inner: Arc<Inner>,
    queue_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<QueueItem>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub async fn new(
        agent: Arc<Agent>,
        llm: Arc<dyn LlmClient>,
        sink: Arc<dyn ChannelSink>,
        skills: SkillRegistry,
        config: &Config,
    ) -> Result<Self> {
        let session = SessionStore::open(&config.data_dir).await?;
        let system_prompt = render_system_prompt(&conversation_tool_definitions(), &skills.names())?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(Inner {
                agent,
                llm,
                sink,
                session,
                skills,
                system_prompt,
                queue_tx,
                last_prompt_tokens: AtomicU64::new(0),
                current_channel: tokio::sync::Mutex::new(None),
                llm_config: config.llm.clone(),
                session_config: config.session.clone(),
                data_dir: config.data_dir.clone(),
            }),
            queue_rx: tokio::sync::Mutex::new(Some(queue_rx)),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    /// Wire the agent's notifications into the queue and launch the worker
    pub async fn start(&self) -> Result<()> {
        let tx = self.inner.queue_tx.clone();
        self.inner.agent.on_notify(Arc::new(move |notification| {
            let _ = tx.send(QueueItem::TaskNotify(notification));
        }));

        let Some(mut rx) = self.queue_rx.lock().await.take() else {
            eyre::bail!("orchestrator already started");
        };
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                if matches!(item, QueueItem::Shutdown) {
                    break;
                }
                if let Err(e) = inner.handle_item(item).await {
                    warn!(error = %e, "queue item failed");
                    inner.deliver_error(&e).await;
                }
            }
            debug!("orchestrator worker exited");
        });
        *self.worker.lock().await = Some(handle);
        info!("orchestrator started");
        Ok(())
    }

    /// Stop the worker after the current item
    pub async fn stop(&self) {
        let _ = self.inner.queue_tx.send(QueueItem::Shutdown);
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
        info!("orchestrator stopped");
    }

    /// Enqueue an inbound user message
    pub fn enqueue_message(&self, text: impl Into<String>, channel: ChannelRef) {
        let _ = self.inner.queue_tx.send(QueueItem::Message {
            text: text.into(),
            channel,
        });
    }

    /// Snapshot of the session history
    pub async fn session_messages(&self) -> Vec<ChatMessage> {
        self.inner.session.messages().await
    }
}

impl Inner {
    async fn handle_item(self: &Arc<Self>, item: QueueItem) -> Result<()> {
        match item {
            QueueItem::Message { text, channel } => {
                *self.current_channel.lock().await = Some(channel);
                self.handle_message(text).await
            }
            QueueItem::TaskNotify(notification) => self.handle_notify(notification).await,
            QueueItem::Think => self.handle_think().await,
            QueueItem::Shutdown => Ok(()),
        }
    }

    async fn handle_message(self: &Arc<Self>, text: String) -> Result<()> {
        if let Some((name, args)) = SkillRegistry::parse_invocation(&text)
            && let Some(skill) = self.skills.get(name)
        {
            let skill = skill.clone();
            return match skill.mode {
                SkillMode::Fork => {
                    let task_id = self
                        .agent
                        .submit(skill.render(args), "skill", None, Some(skill.name.clone()))
                        .await?;
                    self.session
                        .append(ChatMessage::user(format!("[skill {} dispatched as task {}]", name, task_id)))
                        .await;
                    Ok(())
                }
                SkillMode::Inline => {
                    self.session.append(ChatMessage::user(skill.render(args))).await;
                    self.enqueue_think();
                    Ok(())
                }
            };
        }

        self.session.append(ChatMessage::user(text)).await;
        self.enqueue_think();
        Ok(())
    }

    /// Task results come back as synthetic user messages the model thinks on
    async fn handle_notify(self: &Arc<Self>, notification: TaskNotification) -> Result<()> {
        let text = match &notification {
            TaskNotification::Completed { task_id, result } => {
                let response = result.get("response").and_then(|r| r.as_str()).unwrap_or_default();
                format!("[task {} completed]\n{}", task_id, response)
            }
            TaskNotification::Failed { task_id, error } => format!("[task {} failed] {}", task_id, error),
            TaskNotification::Notify { task_id, message } => format!("[task {}] {}", task_id, message),
        };
        self.session
            .append(ChatMessage::user(text).with_metadata(json!({"taskNotify": true})))
            .await;
        self.enqueue_think();
        Ok(())
    }

    /// One think step: compact if needed, call the model, dispatch its tools
    async fn handle_think(self: &Arc<Self>) -> Result<()> {
        self.maybe_compact().await?;

        let messages = self.session.messages().await;
        let request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            messages,
            tools: conversation_tool_definitions(),
            max_tokens: self.llm_config.max_tokens,
        };
        let response = self.llm.complete(request).await?;
        self.last_prompt_tokens.store(response.usage.input_tokens, Ordering::SeqCst);

        if response.tool_calls.is_empty() {
            // Private monologue with nothing to do; record it and stop
            self.session
                .append(ChatMessage::assistant(response.content.unwrap_or_default()))
                .await;
            return Ok(());
        }

        self.session
            .append(ChatMessage::assistant_with_calls(
                response.content.unwrap_or_default(),
                response.tool_calls.clone(),
            ))
            .await;

        let mut follow_up = false;
        for call in &response.tool_calls {
            let content = self.run_conversation_tool(call).await;
            self.session.append(ChatMessage::tool(content, call.id.clone())).await;
            if !is_terminal_tool(&call.name) {
                follow_up = true;
            }
        }
        if follow_up {
            self.enqueue_think();
        }
        Ok(())
    }

    /// Execute one conversation-layer tool; failures become structured
    /// results the model sees next round
    async fn run_conversation_tool(self: &Arc<Self>, call: &ToolCallRequest) -> String {
        let args = &call.arguments;
        let result = match call.name.as_str() {
            "reply" => {
                let text = args.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                let current = self.current_channel.lock().await.clone();
                let channel_id = args
                    .get("channel_id")
                    .and_then(|c| c.as_str())
                    .map(String::from)
                    .or_else(|| current.as_ref().map(|c| c.channel_id.clone()));
                match channel_id {
                    Some(channel_id) => {
                        let message = OutboundMessage {
                            channel_type: args
                                .get("channel_type")
                                .and_then(|c| c.as_str())
                                .map(String::from)
                                .or_else(|| current.as_ref().and_then(|c| c.channel_type.clone())),
                            channel_id,
                            text: text.to_string(),
                            reply_to: args.get("reply_to").and_then(|r| r.as_str()).map(String::from),
                        };
                        self.sink.deliver(message).await.map(|_| json!({"delivered": true}))
                    }
                    None => Err(eyre::eyre!("no channel to reply on")),
                }
            }
            "spawn_subagent" => {
                let input = args.get("input").and_then(|i| i.as_str()).unwrap_or_default();
                let description = args.get("description").and_then(|d| d.as_str()).map(String::from);
                let task_type = args.get("type").and_then(|t| t.as_str()).map(String::from);
                self.agent
                    .submit(input, "orchestrator", task_type, description)
                    .await
                    .map(|task_id| json!({"taskId": task_id}))
            }
            "resume_task" => {
                let task_id = args.get("task_id").and_then(|t| t.as_str()).unwrap_or_default();
                let input = args.get("input").and_then(|i| i.as_str()).unwrap_or_default();
                self.agent
                    .resume(task_id, input)
                    .await
                    .map(|_| json!({"resumed": task_id}))
            }
            "use_skill" => {
                let name = args.get("name").and_then(|n| n.as_str()).unwrap_or_default();
                let skill_args = args.get("args").and_then(|a| a.as_str()).unwrap_or_default();
                match self.skills.get(name).cloned() {
                    Some(skill) => match skill.mode {
                        SkillMode::Fork => self
                            .agent
                            .submit(skill.render(skill_args), "skill", None, Some(skill.name.clone()))
                            .await
                            .map(|task_id| json!({"taskId": task_id})),
                        SkillMode::Inline => {
                            self.session.append(ChatMessage::user(skill.render(skill_args))).await;
                            Ok(json!({"injected": true}))
                        }
                    },
                    None => Err(eyre::eyre!("unknown skill: {}", name)),
                }
            }
            other => Err(eyre::eyre!("unknown tool: {}", other)),
        };

        match result {
            Ok(value) => value.to_string(),
            Err(e) => json!({"error": e.to_string()}).to_string(),
        }
    }

    // === compaction ===

    async fn maybe_compact(self: &Arc<Self>) -> Result<()> {
        let messages = self.session.messages().await;
        let window = self
            .llm_config
            .context_window
            .unwrap_or_else(|| self.llm.context_window());
        let threshold = (window as f64 * self.session_config.compact_threshold) as u64;
        let estimate = self
            .last_prompt_tokens
            .load(Ordering::SeqCst)
            .max(estimate_messages_tokens(&messages));
        if estimate < threshold || messages.is_empty() {
            return Ok(());
        }

        info!(estimate, threshold, "token pressure, compacting session");
        let request = CompletionRequest {
            system_prompt: SUMMARIZER_PROMPT.to_string(),
            messages: messages.clone(),
            tools: Vec::new(),
            max_tokens: self.llm_config.max_tokens,
        };
        let summary_text = self.llm.complete(request).await?.content.unwrap_or_default();
        let summary =
            ChatMessage::user(format!("[Conversation summary]\n{}", summary_text)).with_metadata(json!({"summary": true}));

        let (_archive, archived) = self.session.archive_and_reset(summary).await?;
        self.last_prompt_tokens.store(0, Ordering::SeqCst);

        if reflection_gate(&archived) {
            let llm = Arc::clone(&self.llm);
            let dir = self.data_dir.clone();
            // Fire-and-forget: reflection never blocks the think that
            // triggered compaction
            tokio::spawn(async move {
                if let Err(e) = run_session_reflection(llm, dir, archived).await {
                    debug!(error = %e, "session reflection failed");
                }
            });
        }
        Ok(())
    }

    // === error surface ===

    /// Thrown errors become a classified, user-visible message on the
    /// inbound channel; the worker itself never dies
    async fn deliver_error(self: &Arc<Self>, error: &eyre::Report) {
        let text = match error.downcast_ref::<LlmError>() {
            Some(e) if e.is_auth() => {
                "I cannot reach the language model: authentication failed. Please re-authenticate.".to_string()
            }
            Some(e) if e.is_rate_limit() => {
                "The language model is rate limiting me right now. Please try again in a moment.".to_string()
            }
            Some(e) => format!("The language model returned an error: {}", e),
            None => "Something went wrong handling that. Please try again.".to_string(),
        };

        let channel = self.current_channel.lock().await.clone();
        let Some(channel) = channel else {
            warn!("no channel to deliver error to");
            return;
        };
        let outcome = self
            .sink
            .deliver(OutboundMessage {
                channel_type: channel.channel_type,
                channel_id: channel.channel_id,
                text,
                reply_to: None,
            })
            .await;
        if let Err(e) = outcome {
            warn!(error = %e, "failed to deliver error message");
        }
    }

    fn enqueue_think(&self) {
        let _ = self.queue_tx.send(QueueItem::Think);
    }
}

/// Post-compaction reflection: model output appended to a reflections log
async fn run_session_reflection(llm: Arc<dyn LlmClient>, data_dir: PathBuf, archived: Vec<ChatMessage>) -> Result<()> {
    let request = CompletionRequest {
        system_prompt: REFLECTION_PROMPT.to_string(),
        messages: archived,
        tools: Vec::new(),
        max_tokens: 2048,
    };
    let reflection = llm.complete(request).await?.content.unwrap_or_default();
    if reflection.is_empty() {
        return Ok(());
    }

    let dir = data_dir.join("main");
    tokio::fs::create_dir_all(&dir).await?;
    let line = json!({"ts": chrono::Utc::now().timestamp_millis(), "reflection": reflection}).to_string() + "\n";
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("reflections.jsonl"))
        .await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ScriptedThinker, SubagentRegistry, ThinkOutcome};
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::llm::{CompletionResponse, Role, ScriptedClient};
    use crate::orchestrator::convo::CollectingSink;
    use crate::orchestrator::skills::Skill;
    use crate::persist::TaskPersister;
    use crate::task::TaskRegistry;
    use crate::tools::ToolExecutor;
    use std::time::Duration;
    use tempfile::TempDir;

    struct World {
        orchestrator: Orchestrator,
        client: Arc<ScriptedClient>,
        sink: Arc<CollectingSink>,
        agent: Arc<Agent>,
        bus: Arc<EventBus>,
        _temp: TempDir,
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: crate::ids::short_id("call"),
            name: name.to_string(),
            arguments,
        }
    }

    fn channel() -> ChannelRef {
        ChannelRef {
            channel_type: Some("chat".to_string()),
            channel_id: "chan-1".to_string(),
        }
    }

    async fn world_with(
        responses: Vec<CompletionResponse>,
        thinker: ScriptedThinker,
        skills: SkillRegistry,
        mutate: impl FnOnce(&mut Config),
    ) -> World {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        config.agent.task_timeout = 5;
        mutate(&mut config);

        let bus = Arc::new(EventBus::new());
        let registry: crate::task::SharedRegistry = Arc::new(tokio::sync::Mutex::new(TaskRegistry::new(10)));
        let persister = Arc::new(TaskPersister::new(temp.path(), registry.clone()));
        persister.attach(&bus);
        let executor = Arc::new(ToolExecutor::with_builtins(bus.clone(), Duration::from_secs(5)));
        let agent = Arc::new(Agent::new(
            bus.clone(),
            registry,
            persister,
            Arc::new(thinker),
            executor,
            SubagentRegistry::with_builtins(),
            &config,
        ));
        agent.start().await.unwrap();
        bus.start().await;

        let client = Arc::new(ScriptedClient::new(responses));
        let sink = Arc::new(CollectingSink::new());
        let orchestrator = Orchestrator::new(agent.clone(), client.clone(), sink.clone(), skills, &config)
            .await
            .unwrap();
        orchestrator.start().await.unwrap();

        World {
            orchestrator,
            client,
            sink,
            agent,
            bus,
            _temp: temp,
        }
    }

    async fn world(responses: Vec<CompletionResponse>) -> World {
        world_with(responses, ScriptedThinker::new(vec![]), SkillRegistry::new(), |_| {}).await
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    async fn teardown(world: World) {
        world.orchestrator.stop().await;
        world.agent.stop().await;
        world.bus.stop().await;
    }

    #[tokio::test]
    async fn test_reply_is_terminal_and_visible() {
        let world = world(vec![CompletionResponse {
            content: Some("private thought".to_string()),
            tool_calls: vec![call("reply", json!({"text": "hello user"}))],
            usage: Default::default(),
        }])
        .await;

        world.orchestrator.enqueue_message("hi", channel());
        settle().await;

        let sent = world.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "hello user");
        assert_eq!(sent[0].channel_id, "chan-1");
        // reply is terminal: exactly one think happened
        assert_eq!(world.client.call_count(), 1);

        // Session recorded user, assistant (with calls), and tool result
        let messages = world.orchestrator.session_messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[1].tool_calls.is_some());
        assert_eq!(messages[2].role, Role::Tool);

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_plain_text_is_private() {
        let world = world(vec![CompletionResponse::text("just thinking out loud")]).await;

        world.orchestrator.enqueue_message("hi", channel());
        settle().await;

        // Nothing was delivered, but the monologue was recorded
        assert!(world.sink.sent().is_empty());
        let messages = world.orchestrator.session_messages().await;
        assert_eq!(messages.last().unwrap().content, "just thinking out loud");

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_non_terminal_tool_queues_follow_up_think() {
        let world = world(vec![
            CompletionResponse {
                content: None,
                tool_calls: vec![call("resume_task", json!({"task_id": "task-missing", "input": "x"}))],
                usage: Default::default(),
            },
            CompletionResponse {
                content: None,
                tool_calls: vec![call("reply", json!({"text": "that task does not exist"}))],
                usage: Default::default(),
            },
        ])
        .await;

        world.orchestrator.enqueue_message("resume it", channel());
        settle().await;

        // The failed resume produced a tool-result error and a second think
        assert_eq!(world.client.call_count(), 2);
        let messages = world.orchestrator.session_messages().await;
        let tool_result = messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_result.content.contains("error"));
        assert_eq!(world.sink.sent().len(), 1);

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_spawn_subagent_round_trip() {
        let thinker = ScriptedThinker::new(vec![ThinkOutcome::respond("subtask answer")]);
        let world = world_with(
            vec![
                // Think 1: spawn the subagent (terminal)
                CompletionResponse {
                    content: None,
                    tool_calls: vec![call("spawn_subagent", json!({"description": "sub", "input": "do it"}))],
                    usage: Default::default(),
                },
                // Think 2 (triggered by task_notify): reply with the result
                CompletionResponse {
                    content: None,
                    tool_calls: vec![call("reply", json!({"text": "done: subtask answer"}))],
                    usage: Default::default(),
                },
            ],
            thinker,
            SkillRegistry::new(),
            |_| {},
        )
        .await;

        world.orchestrator.enqueue_message("delegate this", channel());
        for _ in 0..100 {
            if world.sink.sent().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let sent = world.sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("subtask answer"));

        // The notification arrived as a synthetic user message
        let messages = world.orchestrator.session_messages().await;
        assert!(
            messages
                .iter()
                .any(|m| m.role == Role::User && m.content.contains("completed"))
        );

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_llm_error_is_classified_and_delivered() {
        let world = world(vec![]).await;
        world.client.push_error(LlmError::Auth("key expired".to_string()));

        world.orchestrator.enqueue_message("hi", channel());
        settle().await;

        let sent = world.sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("authentication failed"));

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_compaction_archives_and_seeds_summary() {
        let world = world_with(
            vec![
                // Think 1: report enormous prompt usage
                CompletionResponse::text("noted").with_usage(80_000, 10),
                // Think 2 begins with the summarize call...
                CompletionResponse::text("summary of everything"),
                // ...then the actual think on the fresh session
                CompletionResponse::text("fresh thoughts"),
            ],
            ScriptedThinker::new(vec![]),
            SkillRegistry::new(),
            |config| {
                config.llm.context_window = Some(50_000);
                config.session.compact_threshold = 0.8;
            },
        )
        .await;

        world.orchestrator.enqueue_message("first", channel());
        settle().await;
        world.orchestrator.enqueue_message("second", channel());
        settle().await;

        assert_eq!(world.client.call_count(), 3);

        let messages = world.orchestrator.session_messages().await;
        // Fresh session: the summary seed plus the post-compaction monologue.
        // The triggering message was archived with everything else.
        assert!(messages[0].content.starts_with("[Conversation summary]"));
        assert!(messages[0].metadata.as_ref().unwrap()["summary"].as_bool().unwrap());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "fresh thoughts");

        // The old log was archived under a timestamped name
        let main_dir = world._temp.path().join("main");
        let mut archives = 0;
        let mut entries = tokio::fs::read_dir(&main_dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("current-") && name.ends_with(".jsonl") {
                archives += 1;
            }
        }
        assert_eq!(archives, 1);

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_inline_skill_injects_and_thinks() {
        let mut skills = SkillRegistry::new();
        skills.register(Skill::new("focus", "Concentrate on the essentials.", SkillMode::Inline));

        let world = world_with(
            vec![CompletionResponse::text("focused now")],
            ScriptedThinker::new(vec![]),
            skills,
            |_| {},
        )
        .await;

        world.orchestrator.enqueue_message("/focus the budget", channel());
        settle().await;

        let messages = world.orchestrator.session_messages().await;
        assert!(messages[0].content.contains("Concentrate on the essentials."));
        assert!(messages[0].content.contains("the budget"));
        assert_eq!(world.client.call_count(), 1);

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_fork_skill_spawns_task() {
        let mut skills = SkillRegistry::new();
        skills.register(Skill::new("research", "Research the topic thoroughly.", SkillMode::Fork));
        let thinker = ScriptedThinker::new(vec![ThinkOutcome::respond("research complete")]);

        let world = world_with(
            vec![CompletionResponse {
                content: None,
                tool_calls: vec![call("reply", json!({"text": "research is underway"}))],
                usage: Default::default(),
            }],
            thinker,
            skills,
            |_| {},
        )
        .await;

        world.orchestrator.enqueue_message("/research rust history", channel());
        settle().await;

        // The fork recorded a dispatch note instead of thinking
        let messages = world.orchestrator.session_messages().await;
        assert!(messages[0].content.contains("dispatched as task"));

        teardown(world).await;
    }

    #[tokio::test]
    async fn test_reflection_gate() {
        let few = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        assert!(!reflection_gate(&few));

        let mut many = Vec::new();
        for i in 0..4 {
            many.push(ChatMessage::user(format!("u{}", i)));
            many.push(ChatMessage::assistant(format!("a{}", i)));
        }
        assert!(reflection_gate(&many));

        // Long but single-user sessions do not qualify
        let mut monologue = vec![ChatMessage::user("only one")];
        for i in 0..7 {
            monologue.push(ChatMessage::assistant(format!("a{}", i)));
        }
        assert!(!reflection_gate(&monologue));
    }
}
