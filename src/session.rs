use crate::cache::MaterializationCache;
use crate::config::SessionConfig;
use crate::error::{AppendConflict, Result};
use crate::event::{Entry, Event, EventId, PatchEvent};
use crate::fold::{fold_into, Materialized};
use crate::log::{EventReader, EventWriter, LockMode};
use crate::resolve::resolve;
use crate::snapshot::SnapshotManager;
use log::{debug, warn};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory under a session root that holds snapshots.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Builder for configuring and opening a [`Session`].
///
/// # Examples
///
/// ```
/// use patchfold::Session;
///
/// let dir = tempfile::tempdir().unwrap();
/// let session = Session::builder(dir.path())
///     .snapshot_every(100)
///     .keep_snapshots(3)
///     .open()
///     .unwrap();
/// assert_eq!(session.len(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    dir: PathBuf,
    config: SessionConfig,
}

impl SessionBuilder {
    fn new(dir: impl AsRef<Path>) -> Self {
        SessionBuilder {
            dir: dir.as_ref().to_path_buf(),
            config: SessionConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Snapshot cadence in raw entries; `0` disables automatic snapshots.
    pub fn snapshot_every(mut self, entries: u64) -> Self {
        self.config.snapshot_every = entries;
        self
    }

    /// Number of snapshots to retain.
    pub fn keep_snapshots(mut self, keep: usize) -> Self {
        self.config.keep_snapshots = keep;
        self
    }

    /// Writer locking mode.
    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.config.lock_mode = mode;
        self
    }

    /// Open the session, creating its directory if needed.
    ///
    /// Nothing is folded here; the first read resumes from the newest valid
    /// snapshot.
    pub fn open(self) -> io::Result<Session> {
        let writer = EventWriter::open_with_lock(&self.dir, self.config.lock_mode)?;
        let snapshots =
            SnapshotManager::new(self.dir.join(SNAPSHOTS_DIR), self.config.keep_snapshots)?;
        Ok(Session {
            reader: writer.reader(),
            writer: Mutex::new(writer),
            cache: MaterializationCache::new(),
            fold_lock: Mutex::new(()),
            snapshots,
            config: self.config,
            dir: self.dir,
        })
    }
}

/// One session: its audit log, its cached materialization and its
/// snapshots.
///
/// All methods take `&self`; share a session across threads with an `Arc`.
/// Writes serialize on an internal lock. Reads never take it.
///
/// # Examples
///
/// ```
/// use patchfold::{Event, Patch, Session};
/// use serde_json::json;
///
/// let dir = tempfile::tempdir().unwrap();
/// let session = Session::open(dir.path()).unwrap();
///
/// session.append_event(Event::new("msg", json!({"text": "a"}))).unwrap();
/// session.append_event(Event::new("msg", json!({"text": "b"}))).unwrap();
/// let c = session.append_event(Event::new("msg", json!({"text": "c"}))).unwrap();
///
/// session.apply_patch(Patch::truncate_before(c)).unwrap();
///
/// let view = session.get_visible().unwrap();
/// let ids: Vec<u64> = view.visible().map(|e| e.id).collect();
/// assert_eq!(ids, vec![c]);
/// assert_eq!(session.get_raw().unwrap().len(), 4);
/// ```
#[derive(Debug)]
pub struct Session {
    dir: PathBuf,
    writer: Mutex<EventWriter>,
    reader: EventReader,
    cache: MaterializationCache,
    // One fold at a time, so the cached value can be extended in place.
    fold_lock: Mutex<()>,
    snapshots: SnapshotManager,
    config: SessionConfig,
}

impl Session {
    /// Open a session with the default configuration.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::builder(dir).open()
    }

    /// Start configuring a session in `dir`.
    pub fn builder(dir: impl AsRef<Path>) -> SessionBuilder {
        SessionBuilder::new(dir)
    }

    /// Append a plain event. Returns its identifier.
    pub fn append_event(&self, event: Event) -> Result<EventId> {
        let mut writer = self.writer.lock();
        Ok(writer.append(event)?.id)
    }

    /// Append a plain event only if the log still has `expected_len` entries.
    ///
    /// # Errors
    ///
    /// [`Error::ConcurrentAppendConflict`](crate::Error::ConcurrentAppendConflict)
    /// if another writer got there first.
    pub fn append_event_if(&self, event: Event, expected_len: u64) -> Result<EventId> {
        let mut writer = self.writer.lock();
        Ok(writer.append_if(event, expected_len)?.id)
    }

    /// Validate a patch against the current visible log and append it.
    /// Returns the patch's identifier; injected events get the identifiers
    /// that follow it.
    ///
    /// # Errors
    ///
    /// [`Error::PatchRange`](crate::Error::PatchRange) or
    /// [`Error::PatchTarget`](crate::Error::PatchTarget) if the patch does not
    /// fit the visible log. Nothing is appended in that case.
    pub fn apply_patch(&self, patch: impl Into<PatchEvent>) -> Result<EventId> {
        self.append_patch(patch.into(), None)
    }

    /// [`apply_patch`](Self::apply_patch), but only if the log still has
    /// `expected_len` entries.
    pub fn apply_patch_if(
        &self,
        patch: impl Into<PatchEvent>,
        expected_len: u64,
    ) -> Result<EventId> {
        self.append_patch(patch.into(), Some(expected_len))
    }

    fn append_patch(&self, patch: PatchEvent, expected_len: Option<u64>) -> Result<EventId> {
        let mut writer = self.writer.lock();
        let actual_len = writer.len();
        if let Some(expected_len) = expected_len {
            if expected_len != actual_len {
                return Err(AppendConflict {
                    expected_len,
                    actual_len,
                }
                .into());
            }
        }

        // Holding the writer lock, the materialization below covers the
        // whole log, so the patch is checked against exactly the view it
        // will apply to.
        let view = self.materialize()?;
        resolve(&view.index, &patch.patch)?;
        let appended = writer.append_if(patch, actual_len)?;
        debug!(
            "patchfold: accepted patch {} at position {}",
            appended.id, appended.position
        );
        Ok(appended.id)
    }

    /// The visible log and derived state, folded up to the current end.
    pub fn get_visible(&self) -> Result<Arc<Materialized>> {
        self.materialize()
    }

    /// Every raw entry, patches included, in append order.
    pub fn get_raw(&self) -> Result<Vec<Entry>> {
        let entries = self
            .reader
            .read_full()?
            .map(|r| r.map(|(entry, _)| entry))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Fold to the current end and write a snapshot there.
    /// Returns the snapshot position.
    pub fn snapshot(&self) -> Result<u64> {
        let view = self.materialize()?;
        self.snapshots.save(&view, &self.reader)?;
        Ok(view.position)
    }

    /// Move the active log into the compressed archive. Folding and raw
    /// reads are unaffected. Returns the number of entries moved.
    pub fn rotate(&self) -> Result<u64> {
        let mut writer = self.writer.lock();
        Ok(writer.rotate()?)
    }

    /// Number of raw entries.
    pub fn len(&self) -> u64 {
        self.reader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A reader over the raw audit log.
    pub fn reader(&self) -> EventReader {
        self.reader.clone()
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the session directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn materialize(&self) -> Result<Arc<Materialized>> {
        if let Some(m) = self.cache.load() {
            if m.position >= self.reader.len() {
                return Ok(m);
            }
        }

        let _folding = self.fold_lock.lock();
        let len = self.reader.len();
        let mut base = match self.cache.take() {
            Some(m) => m,
            None => Arc::new(self.snapshots.latest(&self.reader, len)?),
        };

        if base.position < len {
            let suffix = match self.read_suffix(base.position) {
                Ok(suffix) => suffix,
                Err(e) => {
                    self.cache.store(base);
                    return Err(e.into());
                }
            };
            // Copies only while a caller still holds an earlier view.
            fold_into(Arc::make_mut(&mut base), suffix);
        }
        self.cache.store(base.clone());

        let every = self.config.snapshot_every;
        if every > 0 && base.position.saturating_sub(self.snapshots.last_position()) >= every {
            if let Err(e) = self.snapshots.save(&base, &self.reader) {
                warn!(
                    "patchfold: automatic snapshot at position {} failed: {e}",
                    base.position
                );
            }
        }
        Ok(base)
    }

    fn read_suffix(&self, from: u64) -> io::Result<Vec<Entry>> {
        self.reader
            .read_from(from)?
            .map(|r| r.map(|(entry, _)| entry))
            .collect()
    }
}
