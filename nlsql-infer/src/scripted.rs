use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use nlsql_types::CompletionRequest;

use crate::{CompletionEngine, LlmError};

/// Deterministic engine that replays queued answers in order.
///
/// Used for offline runs and tests. Every request is recorded so callers can
/// assert on prompt contents and call counts.
pub struct ScriptedCompletionEngine {
    replies: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionEngine {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let engine = Self::new();
        for r in replies {
            engine.push_reply(r);
        }
        engine
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(message.into()));
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ScriptedCompletionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionEngine for ScriptedCompletionEngine {
    async fn complete(&self, req: CompletionRequest) -> Result<String, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(req);
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| LlmError::new("script lock poisoned"))?
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::new(message)),
            None => Err(LlmError::new("script exhausted")),
        }
    }
}
