//! LLM client trait
//!
//! The model adapter is a black box to the rest of the system: structured
//! text in, text plus tool-call requests out. Concrete HTTP adapters are
//! provided by the embedding application; [`ScriptedClient`] serves tests
//! and offline runs.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::error::LlmError;
use super::types::{CompletionRequest, CompletionResponse};

/// Default context window assumed when the adapter does not report one
pub const DEFAULT_CONTEXT_WINDOW: u64 = 200_000;

/// A language model adapter
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion call
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Context window size in tokens, used for compaction estimates
    fn context_window(&self) -> u64 {
        DEFAULT_CONTEXT_WINDOW
    }
}

/// Plays back a fixed sequence of responses
///
/// Each `complete` call pops the next queued response; when the script is
/// exhausted it returns a plain empty-text response. Requests are recorded
/// for assertions.
pub struct ScriptedClient {
    script: std::sync::Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
    context_window: u64,
}

impl ScriptedClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            script: std::sync::Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: std::sync::Mutex::new(Vec::new()),
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Queue an error to be returned by a later call
    pub fn push_error(&self, error: LlmError) {
        self.script.lock().expect("script poisoned").push_back(Err(error));
    }

    /// Queue another response
    pub fn push_response(&self, response: CompletionResponse) {
        self.script.lock().expect("script poisoned").push_back(Ok(response));
    }

    pub fn with_context_window(mut self, context_window: u64) -> Self {
        self.context_window = context_window;
        self
    }

    /// Requests observed so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests poisoned").clone()
    }

    /// Number of completion calls made
    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("requests poisoned").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().expect("requests poisoned").push(request);
        let next = self.script.lock().expect("script poisoned").pop_front();
        match next {
            Some(result) => result,
            None => Ok(CompletionResponse::text("")),
        }
    }

    fn context_window(&self) -> u64 {
        self.context_window
    }
}
