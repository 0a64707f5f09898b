//! Per-session message history with pluggable persistence.

pub mod file;
pub mod memory;

pub use file::{FileHistory, FileStorage};
pub use memory::InMemoryHistory;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AgentryError, Result};
use crate::types::Message;

/// Ordered, append-mostly log of one session's messages.
///
/// A store is owned by exactly one session. Mutations that change what is
/// persisted return `Result` because file-backed stores write through.
pub trait HistoryStore: Send + Sync {
    fn append(&mut self, message: Message) -> Result<()>;

    fn get(&self, index: usize) -> Option<&Message>;

    /// Replace the message at `index`; out of range is an error.
    fn set(&mut self, index: usize, message: Message) -> Result<()>;

    /// Remove and return the last message.
    fn pop(&mut self) -> Result<Option<Message>>;

    fn all_messages(&self) -> &[Message];

    /// Replace the whole log.
    fn restore(&mut self, messages: Vec<Message>) -> Result<()>;

    /// Stored session ids, oldest first.
    fn list_sessions(&self) -> Result<Vec<String>>;

    /// Replace the log with a stored session.
    fn load_session(&mut self, id: &str) -> Result<()>;

    /// Id of the session this store writes to, if it has one.
    fn session_id(&self) -> Option<&str>;

    /// Called once per completed turn.
    fn checkpoint(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.all_messages().len()
    }

    fn is_empty(&self) -> bool {
        self.all_messages().is_empty()
    }

    fn last(&self) -> Option<&Message> {
        self.all_messages().last()
    }

    fn preset_messages(&self) -> Vec<Message> {
        self.all_messages()
            .iter()
            .filter(|m| m.preset)
            .cloned()
            .collect()
    }

    fn non_preset_messages(&self) -> Vec<Message> {
        self.all_messages()
            .iter()
            .filter(|m| !m.preset)
            .cloned()
            .collect()
    }
}

/// Which store new sessions get.
#[derive(Debug, Clone)]
pub enum HistoryBackend {
    /// In-memory log, optionally snapshotted per turn under `log_dir`.
    Memory { log_dir: Option<PathBuf> },
    /// One JSON document per session.
    File(Arc<FileStorage>),
}

impl HistoryBackend {
    pub fn memory() -> Self {
        Self::Memory { log_dir: None }
    }

    /// Create an empty store for `agent` owned by `user`.
    pub fn create(&self, user: &str, agent: &str) -> Box<dyn HistoryStore> {
        match self {
            Self::Memory { log_dir } => {
                let mut history = InMemoryHistory::new(agent);
                if let Some(dir) = log_dir {
                    history = history.with_log_dir(dir.clone());
                }
                Box::new(history)
            }
            Self::File(storage) => Box::new(FileHistory::new(Arc::clone(storage), user, agent)),
        }
    }
}

/// On-disk shape shared by both stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionDocument {
    pub version: u32,
    pub session_id: String,
    pub agent: String,
    pub saved_at: chrono::DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// Sortable session id: UTC timestamp plus a short random suffix.
pub(crate) fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S%3f"), &suffix[..8])
}

/// Make a label safe to use as a single path component.
pub(crate) fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    let out: String = trimmed
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

pub(crate) fn index_error(index: usize, len: usize) -> AgentryError {
    AgentryError::InvalidArgument(format!("history index {index} out of range (len {len})"))
}
