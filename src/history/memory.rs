//! In-memory history with an optional rolling snapshot on disk.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;

use super::{index_error, new_session_id, normalize_label, HistoryStore, SessionDocument};
use crate::error::{AgentryError, Result};
use crate::types::Message;

/// Messages live in memory. When a log directory is set, every
/// checkpoint rewrites `<log_dir>/<agent>/<session_id>.json`.
#[derive(Debug, Clone)]
pub struct InMemoryHistory {
    agent: String,
    session_id: String,
    messages: Vec<Message>,
    log_dir: Option<PathBuf>,
}

impl InMemoryHistory {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            session_id: new_session_id(),
            messages: Vec::new(),
            log_dir: None,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    fn agent_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(normalize_label(&self.agent)))
    }
}

impl HistoryStore for InMemoryHistory {
    fn append(&mut self, message: Message) -> Result<()> {
        self.messages.push(message);
        Ok(())
    }

    fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    fn set(&mut self, index: usize, message: Message) -> Result<()> {
        let len = self.messages.len();
        let slot = self
            .messages
            .get_mut(index)
            .ok_or_else(|| index_error(index, len))?;
        *slot = message;
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<Message>> {
        Ok(self.messages.pop())
    }

    fn all_messages(&self) -> &[Message] {
        &self.messages
    }

    fn restore(&mut self, messages: Vec<Message>) -> Result<()> {
        self.messages = messages;
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        let Some(dir) = self.agent_dir() else {
            return Ok(Vec::new());
        };
        list_json_stems(&dir)
    }

    fn load_session(&mut self, id: &str) -> Result<()> {
        let dir = self
            .agent_dir()
            .ok_or_else(|| AgentryError::InvalidState("no log directory configured".into()))?;
        let doc = read_document(&dir.join(format!("{}.json", normalize_label(id))), id)?;
        self.messages = doc.messages;
        self.session_id = doc.session_id;
        Ok(())
    }

    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn checkpoint(&mut self) -> Result<()> {
        let Some(dir) = self.agent_dir() else {
            return Ok(());
        };
        fs::create_dir_all(&dir)?;
        let doc = SessionDocument {
            version: 1,
            session_id: self.session_id.clone(),
            agent: self.agent.clone(),
            saved_at: Utc::now(),
            messages: self.messages.clone(),
        };
        let path = dir.join(format!("{}.json", self.session_id));
        fs::write(&path, serde_json::to_vec_pretty(&doc)?)?;
        debug!(path = %path.display(), messages = self.messages.len(), "history snapshot");
        Ok(())
    }
}

/// File stems of `*.json` entries in `dir`, sorted. A missing directory
/// has no sessions.
pub(crate) fn list_json_stems(dir: &std::path::Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

pub(crate) fn read_document(path: &std::path::Path, id: &str) -> Result<SessionDocument> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AgentryError::InvalidArgument(format!("unknown session {id}")));
        }
        Err(err) => return Err(err.into()),
    };
    Ok(serde_json::from_str(&raw)?)
}
