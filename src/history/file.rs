//! File-backed history: one JSON document per session.
//!
//! Layout: `<base_dir>/<user>/<agent>/<session_id>.json`. Every mutation
//! writes through atomically (temp file then rename) under a per-file lock
//! held by the shared [`FileStorage`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;

use super::memory::{list_json_stems, read_document};
use super::{index_error, new_session_id, normalize_label, HistoryStore, SessionDocument};
use crate::error::{AgentryError, Result};
use crate::types::Message;

/// Shared root for file-backed histories. Serializes writes per session
/// file across every store created from it.
#[derive(Debug, Default)]
pub struct FileStorage {
    base_dir: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn agent_dir(&self, user: &str, agent: &str) -> PathBuf {
        self.base_dir
            .join(normalize_label(user))
            .join(normalize_label(agent))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Drop the entry for `path` unless another writer still holds it.
    fn release(&self, path: &Path, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one held by the caller.
        if Arc::strong_count(lock) <= 2 {
            locks.remove(path);
        }
    }

    fn write(&self, path: &Path, doc: &SessionDocument) -> Result<()> {
        let lock = self.lock_for(path);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            write_atomic(path, doc)
        };
        self.release(path, &lock);
        result
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn write_atomic(path: &Path, doc: &SessionDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// History persisted on every change.
#[derive(Debug)]
pub struct FileHistory {
    storage: Arc<FileStorage>,
    agent: String,
    dir: PathBuf,
    session_id: String,
    messages: Vec<Message>,
}

impl FileHistory {
    pub fn new(storage: Arc<FileStorage>, user: &str, agent: &str) -> Self {
        let dir = storage.agent_dir(user, agent);
        Self {
            storage,
            agent: agent.to_string(),
            dir,
            session_id: new_session_id(),
            messages: Vec::new(),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.session_id))
    }

    fn persist(&self) -> Result<()> {
        let doc = SessionDocument {
            version: 1,
            session_id: self.session_id.clone(),
            agent: self.agent.clone(),
            saved_at: Utc::now(),
            messages: self.messages.clone(),
        };
        self.storage.write(&self.path(), &doc)?;
        debug!(session = %self.session_id, messages = self.messages.len(), "history saved");
        Ok(())
    }
}

impl HistoryStore for FileHistory {
    fn append(&mut self, message: Message) -> Result<()> {
        self.messages.push(message);
        self.persist()
    }

    fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    fn set(&mut self, index: usize, message: Message) -> Result<()> {
        let len = self.messages.len();
        *self
            .messages
            .get_mut(index)
            .ok_or_else(|| index_error(index, len))? = message;
        self.persist()
    }

    fn pop(&mut self) -> Result<Option<Message>> {
        let popped = self.messages.pop();
        if popped.is_some() {
            self.persist()?;
        }
        Ok(popped)
    }

    fn all_messages(&self) -> &[Message] {
        &self.messages
    }

    fn restore(&mut self, messages: Vec<Message>) -> Result<()> {
        self.messages = messages;
        self.persist()
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        list_json_stems(&self.dir)
    }

    fn load_session(&mut self, id: &str) -> Result<()> {
        let id = normalize_label(id);
        let doc = read_document(&self.dir.join(format!("{id}.json")), &id)?;
        if doc.agent != self.agent {
            return Err(AgentryError::InvalidArgument(format!(
                "session {id} belongs to agent {}",
                doc.agent
            )));
        }
        self.messages = doc.messages;
        self.session_id = id;
        Ok(())
    }

    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn storage() -> (TempDir, Arc<FileStorage>) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()));
        (dir, storage)
    }

    #[test]
    fn append_writes_document_under_user_and_agent() {
        let (dir, storage) = storage();
        let mut history = FileHistory::new(storage, "alice", "chef");
        history.append(Message::user("hello")).unwrap();

        let id = history.session_id().unwrap().to_string();
        let path = dir.path().join("alice").join("chef").join(format!("{id}.json"));
        let doc: SessionDocument =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc.agent, "chef");
        assert_eq!(doc.messages.len(), 1);
        assert_eq!(doc.messages[0].content, "hello");
    }

    #[test]
    fn sessions_are_listed_and_reloaded() {
        let (_dir, storage) = storage();
        let mut first = FileHistory::new(Arc::clone(&storage), "alice", "chef");
        first.append(Message::user("one")).unwrap();
        first.append(Message::assistant("two")).unwrap();
        let id = first.session_id().unwrap().to_string();

        let mut second = FileHistory::new(storage, "alice", "chef");
        assert_eq!(second.list_sessions().unwrap(), vec![id.clone()]);
        second.load_session(&id).unwrap();
        let contents: Vec<_> = second
            .all_messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["one", "two"]);

        // Writes now go to the loaded session.
        second.append(Message::user("three")).unwrap();
        first.load_session(&id).unwrap();
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn users_do_not_see_each_other() {
        let (_dir, storage) = storage();
        let mut alice = FileHistory::new(Arc::clone(&storage), "alice", "chef");
        alice.append(Message::user("mine")).unwrap();
        let bob = FileHistory::new(storage, "bob", "chef");
        assert!(bob.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn pop_and_restore_persist() {
        let (_dir, storage) = storage();
        let mut history = FileHistory::new(Arc::clone(&storage), "u", "chef");
        history
            .restore(vec![Message::system("s").into_preset(), Message::user("q")])
            .unwrap();
        assert_eq!(history.pop().unwrap().unwrap().content, "q");

        let id = history.session_id().unwrap().to_string();
        let mut reloaded = FileHistory::new(storage, "u", "chef");
        reloaded.load_session(&id).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(0).unwrap().preset);
    }

    #[test]
    fn no_temp_files_remain() {
        let (dir, storage) = storage();
        let mut history = FileHistory::new(storage, "u", "chef");
        history.append(Message::user("x")).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("u").join("chef"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn lock_entries_are_released_after_writes() {
        let (_dir, storage) = storage();
        let mut a = FileHistory::new(Arc::clone(&storage), "u", "chef");
        let mut b = FileHistory::new(Arc::clone(&storage), "u", "tutor");
        a.append(Message::user("one")).unwrap();
        b.append(Message::user("two")).unwrap();
        a.append(Message::assistant("three")).unwrap();
        assert_eq!(storage.tracked_locks(), 0);
    }

    #[test]
    fn concurrent_writers_keep_documents_whole() {
        let (_dir, storage) = storage();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    let mut history = FileHistory::new(storage, "u", &format!("agent{i}"));
                    for n in 0..10 {
                        history.append(Message::user(format!("m{n}"))).unwrap();
                    }
                    history.session_id().unwrap().to_string()
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let id = handle.join().unwrap();
            let mut reloaded = FileHistory::new(Arc::clone(&storage), "u", &format!("agent{i}"));
            reloaded.load_session(&id).unwrap();
            assert_eq!(reloaded.len(), 10);
        }
        assert_eq!(storage.tracked_locks(), 0);
    }
}
