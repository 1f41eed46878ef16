use async_trait::async_trait;
use nlsql_types::CompletionRequest;
use thiserror::Error;

pub mod http_chat;
pub use http_chat::{ChatApiFlavor, HttpChatEngine};

pub mod scripted;
pub use scripted::ScriptedCompletionEngine;

#[derive(Debug, Error)]
#[error("llm error: {message}")]
pub struct LlmError {
    pub message: String,
}

impl LlmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Remote text-completion service.
///
/// Output is best-effort text; callers treat it as untrusted even when the
/// prompt asks for JSON.
#[async_trait]
pub trait CompletionEngine: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<String, LlmError>;
}

/// Dummy implementation that always answers with an empty completion.
pub struct NullCompletionEngine;

#[async_trait]
impl CompletionEngine for NullCompletionEngine {
    async fn complete(&self, _req: CompletionRequest) -> Result<String, LlmError> {
        Ok(String::new())
    }
}
