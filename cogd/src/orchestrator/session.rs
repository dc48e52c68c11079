//! Session store - the conversation layer's message history
//!
//! Every appended message is also written to `{dataDir}/main/current.jsonl`;
//! on restart the log is replayed to reconstruct the in-memory list.
//! Compaction atomically archives the current log under a timestamped name
//! and starts a new session seeded with a single summary message.

use std::path::{Path, PathBuf};

use chrono::Utc;
use eyre::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::llm::ChatMessage;

/// Session message list backed by a JSONL log
pub struct SessionStore {
    dir: PathBuf,
    messages: tokio::sync::Mutex<Vec<ChatMessage>>,
}

impl SessionStore {
    /// Open (or create) the session under `{data_dir}/main`, replaying any
    /// existing log
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("main");
        fs::create_dir_all(&dir).await?;

        let current = dir.join("current.jsonl");
        let mut messages = Vec::new();
        if let Ok(content) = fs::read_to_string(&current).await {
            for line in content.lines() {
                match serde_json::from_str::<ChatMessage>(line) {
                    Ok(message) => messages.push(message),
                    Err(e) => debug!(error = %e, "skipping unparseable session line"),
                }
            }
            info!(count = messages.len(), "replayed session log");
        }

        Ok(Self {
            dir,
            messages: tokio::sync::Mutex::new(messages),
        })
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join("current.jsonl")
    }

    /// Append a message to memory and the log; log failures only warn
    pub async fn append(&self, message: ChatMessage) {
        {
            let mut messages = self.messages.lock().await;
            messages.push(message.clone());
        }
        if let Err(e) = self.append_line(&message).await {
            warn!(error = %e, "failed to persist session message");
        }
    }

    async fn append_line(&self, message: &ChatMessage) -> Result<()> {
        let line = serde_json::to_string(message)? + "\n";
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Snapshot of the current session
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// Archive the current log under a timestamped name and start a fresh
    /// session containing only `summary`
    ///
    /// Returns the archive path and the messages that were archived.
    pub async fn archive_and_reset(&self, summary: ChatMessage) -> Result<(PathBuf, Vec<ChatMessage>)> {
        let mut messages = self.messages.lock().await;

        let archive = self
            .dir
            .join(format!("current-{}.jsonl", Utc::now().format("%Y%m%d-%H%M%S%3f")));
        let current = self.current_path();
        if fs::try_exists(&current).await.unwrap_or(false) {
            fs::rename(&current, &archive).await?;
        }

        let archived = std::mem::take(&mut *messages);
        messages.push(summary.clone());
        drop(messages);

        // Seed the new log with the summary line
        if let Err(e) = self.append_line(&summary).await {
            warn!(error = %e, "failed to seed compacted session log");
        }

        info!(archive = %archive.display(), archived = archived.len(), "session compacted");
        Ok((archive, archived))
    }
}
