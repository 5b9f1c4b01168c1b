use crate::config::SessionConfig;
use crate::error::Result;
use crate::event::{Entry, Event, EventId, PatchEvent};
use crate::fold::Materialized;
use crate::log::LOG_FILE;
use crate::session::Session;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sessions laid out as subdirectories of one root.
///
/// Each session is opened at most once per store and shared through an
/// `Arc`, so every caller in the process goes through the same writer lock
/// and materialization cache.
///
/// # Examples
///
/// ```
/// use patchfold::{Event, SessionStore};
/// use serde_json::json;
///
/// let root = tempfile::tempdir().unwrap();
/// let store = SessionStore::open(root.path()).unwrap();
///
/// store.append_event("chat-1", Event::new("msg", json!({"text": "hi"}))).unwrap();
/// let view = store.get_visible("chat-1").unwrap();
/// assert_eq!(view.visible_len(), 1);
/// assert_eq!(store.session_names().unwrap(), vec!["chat-1".to_string()]);
/// ```
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
    config: SessionConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// Open a store rooted at `root` with the default session config.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_config(root, SessionConfig::default())
    }

    /// Open a store whose sessions all use `config`.
    pub fn open_with_config(root: impl AsRef<Path>, config: SessionConfig) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(SessionStore {
            root,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// The session named `name`, opened on first use.
    ///
    /// Names may contain ASCII letters, digits, `-`, `_` and `.`, and may not
    /// be `.` or `..`.
    pub fn session(&self, name: &str) -> Result<Arc<Session>> {
        validate_name(name)?;
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(name) {
            return Ok(Arc::clone(session));
        }
        let session = Session::builder(self.root.join(name))
            .config(self.config.clone())
            .open()?;
        debug!("patchfold: opened session {name}");
        let session = Arc::new(session);
        sessions.insert(name.to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub fn append_event(&self, name: &str, event: Event) -> Result<EventId> {
        self.session(name)?.append_event(event)
    }

    pub fn apply_patch(&self, name: &str, patch: impl Into<PatchEvent>) -> Result<EventId> {
        self.session(name)?.apply_patch(patch)
    }

    pub fn get_visible(&self, name: &str) -> Result<Arc<Materialized>> {
        self.session(name)?.get_visible()
    }

    pub fn get_raw(&self, name: &str) -> Result<Vec<Entry>> {
        self.session(name)?.get_raw()
    }

    /// Drop the store's handle to a session. The session closes (and its
    /// writer lock is released) once every other handle is dropped too.
    pub fn close(&self, name: &str) -> bool {
        self.sessions.lock().remove(name).is_some()
    }

    /// Names of every session on disk, sorted.
    pub fn session_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || !entry.path().join(LOG_FILE).exists() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn validate_name(name: &str) -> io::Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("patchfold: invalid session name {name:?}"),
        ))
    }
}
