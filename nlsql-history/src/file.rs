use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nlsql_types::{ConversationRecord, Role};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::{blank_record, new_id, push_message, ConversationStore, HistoryError};

/// One JSON document per conversation under a directory.
///
/// Writes go through a temp file and a rename; a store-wide lock serializes
/// read-modify-write cycles.
pub struct FileConversationStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConversationStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| HistoryError::Io(e.to_string()))?;
        info!(dir = %dir.display(), "conversation store opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, HistoryError> {
        let valid = !id.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(HistoryError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, path: &Path) -> Result<Option<ConversationRecord>, HistoryError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| HistoryError::Parse(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HistoryError::Io(e.to_string())),
        }
    }

    async fn write(&self, path: &Path, record: &ConversationRecord) -> Result<(), HistoryError> {
        let body =
            serde_json::to_vec_pretty(record).map_err(|e| HistoryError::Parse(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| HistoryError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| HistoryError::Io(e.to_string()))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn create(&self, topic: Option<&str>) -> Result<String, HistoryError> {
        let id = new_id();
        let path = self.path_for(&id)?;
        let _guard = self.write_lock.lock().await;
        self.write(&path, &blank_record(&id, topic)).await?;
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
        let path = self.path_for(conversation_id)?;
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read(&path)
            .await?
            .unwrap_or_else(|| blank_record(conversation_id, None));
        push_message(&mut record, role, content, metadata);
        self.write(&path, &record).await
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationRecord>, HistoryError> {
        if conversation_id.is_empty() {
            return Ok(None);
        }
        let path = self.path_for(conversation_id)?;
        self.read(&path).await
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileConversationStore::open(dir.path()).unwrap();
            let id = store.create(None).await.unwrap();
            store
                .append(&id, Role::User, "Show me all customers", json!({}))
                .await
                .unwrap();
            id
        };

        let store = FileConversationStore::open(dir.path()).unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].role, Role::User);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::open(dir.path()).unwrap();
        let err = store
            .append("../escape", Role::User, "x", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::InvalidId(_)));
    }
}
