use std::collections::HashMap;

use async_trait::async_trait;
use nlsql_types::{ConversationRecord, Role};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{blank_record, new_id, push_message, ConversationStore, HistoryError};

/// Process-local history. Lost on restart.
#[derive(Default)]
pub struct InMemoryConversationStore {
    records: Mutex<HashMap<String, ConversationRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, topic: Option<&str>) -> Result<String, HistoryError> {
        let id = new_id();
        self.records
            .lock()
            .await
            .insert(id.clone(), blank_record(&id, topic));
        Ok(id)
    }

    async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        metadata: Value,
    ) -> Result<(), HistoryError> {
        if conversation_id.is_empty() {
            return Ok(());
        }
        let mut records = self.records.lock().await;
        let record = records
            .entry(conversation_id.to_string())
            .or_insert_with(|| blank_record(conversation_id, None));
        push_message(record, role, content, metadata);
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationRecord>, HistoryError> {
        Ok(self.records.lock().await.get(conversation_id).cloned())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
