//! Conversation history persisted as one JSON object keyed by user id.
//!
//! ```json
//! { "user": [ {"role": "system", "content": "..."}, {"role": "user", "content": "hi"} ] }
//! ```
//!
//! The whole file is rewritten on every append. An unreadable or invalid
//! file loads as an empty history.

use crate::error::{AssistantError, Result};
use crate::llm::ChatMessage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

type Conversations = BTreeMap<String, Vec<ChatMessage>>;

/// JSON-file conversation store.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    data: Conversations,
}

impl ConversationStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error only if a missing file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            load(&path)
        } else {
            let data = Conversations::new();
            save(&path, &data)?;
            data
        };
        Ok(Self { path, data })
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `user_id` has any stored conversation.
    pub fn has_user(&self, user_id: &str) -> bool {
        self.data.contains_key(user_id)
    }

    /// Ordered messages for `user_id` (empty if unknown).
    pub fn history(&self, user_id: &str) -> &[ChatMessage] {
        self.data
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Append one message and rewrite the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written. The in-memory
    /// history keeps the message either way.
    pub fn append(&mut self, user_id: &str, message: ChatMessage) -> Result<()> {
        self.data
            .entry(user_id.to_owned())
            .or_default()
            .push(message);
        save(&self.path, &self.data)
    }

    /// Seed a system prompt when the user has no messages yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn ensure_system_prompt(&mut self, user_id: &str, prompt: &str) -> Result<()> {
        if !self.history(user_id).is_empty() || prompt.trim().is_empty() {
            return Ok(());
        }
        self.append(user_id, ChatMessage::system(prompt))
    }

    /// Empty the user's conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn clear_user(&mut self, user_id: &str) -> Result<()> {
        if let Some(messages) = self.data.get_mut(user_id) {
            messages.clear();
            save(&self.path, &self.data)?;
        }
        Ok(())
    }
}

fn load(path: &Path) -> Conversations {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), "cannot read history, starting fresh: {e}");
            return Conversations::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), "invalid history file, starting fresh: {e}");
            Conversations::new()
        }
    }
}

fn save(path: &Path, data: &Conversations) -> Result<()> {
    let failed =
        |e: &dyn std::fmt::Display| AssistantError::History(format!("{}: {e}", path.display()));
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| failed(&e))?;
    }
    let json = serde_json::to_string_pretty(data).map_err(|e| failed(&e))?;
    std::fs::write(path, json).map_err(|e| failed(&e))?;
    debug!(path = %path.display(), "history saved");
    Ok(())
}
