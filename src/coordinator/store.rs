//! Message persistence per conversation

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::types::{ClientError, Message, Result};

/// Saves and loads finished messages
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// All saved messages for a conversation, oldest first
    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Save one finished message
    async fn append(&self, conversation_id: &str, message: &Message) -> Result<()>;

    /// Forget a conversation
    async fn clear(&self, conversation_id: &str) -> Result<()>;
}

/// One JSON line per message in `<dir>/<conversation_id>.jsonl`
///
/// A message id seen twice (e.g. an assistant message saved again after a
/// late update) resolves to its last line on load.
#[derive(Debug)]
pub struct JsonlMessageStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlMessageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> Result<PathBuf> {
        let valid = !conversation_id.is_empty()
            && conversation_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !conversation_id.starts_with('.');
        if !valid {
            return Err(ClientError::persistence(format!(
                "invalid conversation id: {:?}",
                conversation_id
            )));
        }
        Ok(self.dir.join(format!("{}.jsonl", conversation_id)))
    }
}

#[async_trait]
impl MessageStore for JsonlMessageStore {
    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let path = self.path_for(conversation_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages: Vec<Message> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping unreadable message line"
                    );
                    continue;
                }
            };
            match positions.get(&message.id) {
                Some(&index) => messages[index] = message,
                None => {
                    positions.insert(message.id.clone(), messages.len());
                    messages.push(message);
                }
            }
        }

        tracing::debug!(conversation_id = %conversation_id, count = messages.len(), "Loaded messages");
        Ok(messages)
    }

    async fn append(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let path = self.path_for(conversation_id)?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> Result<()> {
        let path = self.path_for(conversation_id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    conversations: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .conversations
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let mut conversations = self.conversations.lock().await;
        let messages = conversations.entry(conversation_id.to_string()).or_default();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> Result<()> {
        self.conversations.lock().await.remove(conversation_id);
        Ok(())
    }
}
