//! Conversation history behind a capability trait.
//!
//! Two backends exist: an in-memory map and a directory of JSON documents.
//! The host picks one at startup; nothing switches backends at runtime.

use async_trait::async_trait;
use nlsql_types::{ConversationMessage, ConversationRecord, Role};
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub use memory::InMemoryConversationStore;

pub mod file;
pub use file::FileConversationStore;

pub const DEFAULT_TOPIC: &str = "New conversation";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid conversation id: {0}")]
    InvalidId(String),
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Start a conversation and return its id.
    async fn create(&self, topic: Option<&str>) -> Result<String, HistoryError>;

    /// Append a message, creating the conversation when the id is unknown.
    /// An empty id is ignored.
    async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        metadata: Value,
    ) -> Result<(), HistoryError>;

    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationRecord>, HistoryError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn blank_record(id: &str, topic: Option<&str>) -> ConversationRecord {
    let ts = now();
    ConversationRecord {
        id: id.to_string(),
        topic: topic.unwrap_or(DEFAULT_TOPIC).to_string(),
        created_at: ts.clone(),
        updated_at: ts,
        messages: Vec::new(),
    }
}

pub(crate) fn push_message(record: &mut ConversationRecord, role: Role, content: &str, metadata: Value) {
    let ts = now();
    record.messages.push(ConversationMessage {
        role,
        content: content.to_string(),
        metadata,
        timestamp: ts.clone(),
    });
    record.updated_at = ts;
}
