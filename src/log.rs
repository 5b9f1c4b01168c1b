use crate::archive;
use crate::error::{AppendConflict, Error};
use crate::event::{Entry, EventId};
use fs2::FileExt;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Active audit log file name inside a session directory.
pub const LOG_FILE: &str = "audit.jsonl";
/// Compressed archive of rotated entries.
pub const ARCHIVE_FILE: &str = "audit.archive.jsonl.zst";
const LOCK_FILE: &str = "audit.lock";

/// Compute xxh64 hash of raw line bytes (without trailing newline), hex-encoded.
pub fn line_hash(line: &[u8]) -> String {
    let hash = xxhash_rust::xxh64::xxh64(line, 0);
    format!("{:016x}", hash)
}

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// How an [`EventWriter`] guards its directory against other writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Exclusive advisory lock on `audit.lock`, held until the writer drops.
    #[default]
    Flock,
    /// No locking. The caller guarantees a single writer.
    None,
}

/// Raw position → byte offset addressing, shared by a writer and its readers.
///
/// Positions below `archived` live in the compressed archive; position
/// `archived + i` starts at byte `offsets[i]` of the active file. `end` is
/// the byte length of complete, published lines; readers never look past it.
#[derive(Debug, Default)]
struct AddressIndex {
    archived: u64,
    offsets: Vec<u64>,
    end: u64,
}

impl AddressIndex {
    fn len(&self) -> u64 {
        self.archived + self.offsets.len() as u64
    }
}

/// Where an appended entry landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    /// Identifier assigned to the entry.
    pub id: EventId,
    /// Raw position of the entry.
    pub position: u64,
    /// xxh64 hash of the written line.
    pub line_hash: String,
}

/// The single writer of a session's audit log.
///
/// Appends are one JSON line each, synced before they become visible to
/// readers. Obtain readers with [`EventWriter::reader`].
pub struct EventWriter {
    dir: PathBuf,
    file: File,
    _lock: Option<File>,
    next_id: EventId,
    reader: EventReader,
    // Set when a failed append could not be cut back; the file may hold a
    // partial line past the published end.
    poisoned: bool,
}

impl std::fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWriter")
            .field("dir", &self.dir)
            .field("next_id", &self.next_id)
            .field("len", &self.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl EventWriter {
    /// Open or create the audit log in `dir` with an exclusive lock.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_lock(dir, LockMode::Flock)
    }

    /// Open or create the audit log in `dir`.
    ///
    /// A partial trailing line left by a crash is cut off. A rotation that
    /// crashed after archiving but before resetting the active file is
    /// completed.
    pub fn open_with_lock(dir: impl AsRef<Path>, mode: LockMode) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let log_path = dir.join(LOG_FILE);
        let archive_path = dir.join(ARCHIVE_FILE);

        let lock = match mode {
            LockMode::Flock => Some(acquire_lock(&dir.join(LOCK_FILE))?),
            LockMode::None => None,
        };

        let (archived, archived_max_id) = archive::scan(&archive_path)?;
        let recovered = recover_active(&log_path, archived)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let next_id = archived_max_id.max(recovered.max_id) + 1;
        let index = AddressIndex {
            archived,
            offsets: recovered.offsets,
            end: recovered.end,
        };
        debug!(
            "patchfold: opened {} with {} entries ({} archived), next id {}",
            log_path.display(),
            index.len(),
            archived,
            next_id
        );

        Ok(EventWriter {
            dir,
            file,
            _lock: lock,
            next_id,
            poisoned: false,
            reader: EventReader {
                log_path,
                archive_path,
                index: Arc::new(RwLock::new(index)),
            },
        })
    }

    /// Append an entry, assigning its identifier and position.
    ///
    /// Events injected by a patch receive the identifiers that follow the
    /// patch's own. The line is synced to disk before readers can see it.
    ///
    /// If a write fails and the partial line cannot be cut back, the writer
    /// refuses every later append. Reopening the log repairs the file.
    pub fn append(&mut self, entry: impl Into<Entry>) -> io::Result<AppendResult> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "patchfold: writer for {} is unusable after a failed write; reopen the log",
                self.reader.log_path.display()
            )));
        }
        let mut entry = entry.into();
        let position = self.len();
        entry.stamp(self.next_id, position);

        let mut line = serde_json::to_vec(&entry).map_err(invalid_data)?;
        let hash = line_hash(&line);
        line.push(b'\n');

        let start = self.reader.index.read().end;
        if let Err(e) = self.write_line(&line) {
            // Drop whatever part of the line made it out so the next append
            // starts on a clean boundary.
            if let Err(cut) = self.file.set_len(start) {
                warn!(
                    "patchfold: could not cut {} back to {start} bytes after a failed write: {cut}",
                    self.reader.log_path.display()
                );
                self.poisoned = true;
            }
            return Err(e);
        }

        {
            let mut index = self.reader.index.write();
            index.offsets.push(start);
            index.end = start + line.len() as u64;
        }

        let id = self.next_id;
        self.next_id += entry.id_span();
        Ok(AppendResult {
            id,
            position,
            line_hash: hash,
        })
    }

    /// Append only if the log still has `expected_len` entries.
    ///
    /// # Errors
    ///
    /// [`Error::ConcurrentAppendConflict`] if the length differs, or
    /// [`Error::Io`] if the write fails.
    pub fn append_if(
        &mut self,
        entry: impl Into<Entry>,
        expected_len: u64,
    ) -> Result<AppendResult, Error> {
        let actual_len = self.len();
        if actual_len != expected_len {
            return Err(AppendConflict {
                expected_len,
                actual_len,
            }
            .into());
        }
        Ok(self.append(entry)?)
    }

    /// Move the active log into the compressed archive.
    ///
    /// Positions and identifiers are unaffected; readers keep seeing every
    /// entry. Returns the number of entries moved.
    pub fn rotate(&mut self) -> io::Result<u64> {
        // `&mut self` keeps appends out, so the published end is stable and
        // the slow part can run without blocking readers.
        let (end, moved) = {
            let index = self.reader.index.read();
            (index.end, index.offsets.len() as u64)
        };
        if moved == 0 {
            return Ok(0);
        }

        let log_path = &self.reader.log_path;
        let mut data = fs::read(log_path)?;
        data.truncate(end as usize);
        archive::append_frame(&self.reader.archive_path, &data)?;

        // Swap in a fresh file instead of truncating in place, so readers
        // that already opened the old one finish on intact bytes.
        let tmp_path = log_path.with_extension("jsonl.tmp");
        File::create(&tmp_path)?.sync_all()?;
        {
            let mut index = self.reader.index.write();
            fs::rename(&tmp_path, log_path)?;
            index.archived += moved;
            index.offsets.clear();
            index.end = 0;
        }
        match OpenOptions::new().append(true).open(log_path) {
            Ok(file) => self.file = file,
            Err(e) => {
                // The old handle now points at the unlinked file.
                self.poisoned = true;
                return Err(e);
            }
        }
        // Whatever a failed append left behind went out with the old file.
        self.poisoned = false;

        info!(
            "patchfold: rotated {moved} entries into {}",
            self.reader.archive_path.display()
        );
        Ok(moved)
    }

    /// Number of entries in the audit log, archived ones included.
    pub fn len(&self) -> u64 {
        self.reader.len()
    }

    /// Whether the audit log has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifier the next appended entry will receive.
    pub fn next_id(&self) -> EventId {
        self.next_id
    }

    /// A reader sharing this writer's addressing index.
    pub fn reader(&self) -> EventReader {
        self.reader.clone()
    }

    /// Returns the session directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line)?;
        self.file.sync_data()
    }
}

fn acquire_lock(lock_path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "patchfold: another writer holds the lock on {}",
                lock_path.display()
            ),
        )),
        Err(e) => Err(e),
    }
}

struct Recovered {
    offsets: Vec<u64>,
    end: u64,
    max_id: EventId,
}

/// Scan the active log, repairing what a crash can leave behind.
fn recover_active(log_path: &Path, archived: u64) -> io::Result<Recovered> {
    let bytes = match fs::read(log_path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Recovered {
                offsets: Vec::new(),
                end: 0,
                max_id: 0,
            });
        }
        Err(e) => return Err(e),
    };

    let mut offsets = Vec::new();
    let mut max_id = 0;
    let mut keep_from = 0usize;
    let mut pos = 0usize;

    while let Some(nl) = bytes[pos..].iter().position(|&b| b == b'\n') {
        let line = &bytes[pos..pos + nl];
        let next = pos + nl + 1;
        if !line.is_empty() {
            let entry: Entry = serde_json::from_slice(line).map_err(invalid_data)?;
            if entry.position() < archived {
                // Already in the archive: a rotation died before swapping files.
                keep_from = next;
            } else {
                let expected = archived + offsets.len() as u64;
                if entry.position() != expected {
                    return Err(invalid_data(format!(
                        "patchfold: entry at byte {pos} has position {}, expected {expected}",
                        entry.position()
                    )));
                }
                offsets.push((pos - keep_from) as u64);
                max_id = max_id.max(entry.max_id());
            }
        }
        pos = next;
    }

    if pos < bytes.len() {
        warn!(
            "patchfold: dropping {} bytes of partial line at end of {}",
            bytes.len() - pos,
            log_path.display()
        );
    }

    if keep_from > 0 {
        warn!(
            "patchfold: completing interrupted rotation of {}",
            log_path.display()
        );
        let tmp_path = log_path.with_extension("jsonl.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes[keep_from..pos])?;
        tmp.sync_data()?;
        drop(tmp);
        fs::rename(&tmp_path, log_path)?;
    } else if pos < bytes.len() {
        let file = OpenOptions::new().write(true).open(log_path)?;
        file.set_len(pos as u64)?;
        file.sync_data()?;
    }

    Ok(Recovered {
        offsets,
        end: (pos - keep_from) as u64,
        max_id,
    })
}

/// Read access to a session's audit log.
///
/// Cheap to clone, `Send + Sync`. Every read observes the prefix of the log
/// that was published when the read started.
#[derive(Debug, Clone)]
pub struct EventReader {
    log_path: PathBuf,
    archive_path: PathBuf,
    index: Arc<RwLock<AddressIndex>>,
}

impl EventReader {
    /// Read entries starting at raw `position` up to the current end.
    ///
    /// Yields `(entry, line_hash)`. The iterator is lazy; calling
    /// `read_from` again restarts from any position. A position at or past
    /// the end yields nothing.
    pub fn read_from(&self, position: u64) -> io::Result<EntryIter> {
        let index = self.index.read();
        let position = position.min(index.len());

        let (archive_lines, archive_skip, archive_remaining, active_start) =
            if position < index.archived {
                let reader = archive::open_reader(&self.archive_path)?.ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!(
                            "patchfold: archive {} is missing",
                            self.archive_path.display()
                        ),
                    )
                })?;
                (
                    Some(reader.lines()),
                    position,
                    index.archived - position,
                    0,
                )
            } else {
                let active = (position - index.archived) as usize;
                let start = index.offsets.get(active).copied().unwrap_or(index.end);
                (None, 0, 0, start)
            };

        // Open while holding the index so rotation can't swap the file
        // between reading the offsets and opening it.
        let mut file = File::open(&self.log_path)?;
        file.seek(SeekFrom::Start(active_start))?;
        let active = BufReader::new(file.take(index.end - active_start)).lines();
        drop(index);

        Ok(EntryIter {
            archive_lines,
            archive_skip,
            archive_remaining,
            active,
        })
    }

    /// Read every entry from position 0, archive included.
    pub fn read_full(&self) -> io::Result<EntryIter> {
        self.read_from(0)
    }

    /// Hash of the raw line at `position`, or `None` past the end.
    pub fn line_hash_at(&self, position: u64) -> io::Result<Option<String>> {
        if position >= self.len() {
            return Ok(None);
        }
        match self.read_from(position)?.next() {
            Some(Ok((_, hash))) => Ok(Some(hash)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Number of published entries.
    pub fn len(&self) -> u64 {
        self.index.read().len()
    }

    /// Whether no entries have been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries that live in the compressed archive.
    pub fn archived_len(&self) -> u64 {
        self.index.read().archived
    }

    /// Byte size of the published part of the active log.
    pub fn active_log_size(&self) -> u64 {
        self.index.read().end
    }

    /// Returns the path to the active log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Returns the path to the archive file.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }
}

/// Iterator returned by [`EventReader::read_from`].
pub struct EntryIter {
    archive_lines: Option<Lines<Box<dyn BufRead>>>,
    archive_skip: u64,
    archive_remaining: u64,
    active: Lines<BufReader<Take<File>>>,
}

impl EntryIter {
    fn next_archived(&mut self) -> Option<io::Result<String>> {
        let lines = self.archive_lines.as_mut()?;
        loop {
            if self.archive_remaining == 0 {
                self.archive_lines = None;
                return None;
            }
            let line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.archive_lines = None;
                    return Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "patchfold: archive ended before its recorded length",
                    )));
                }
            };
            if line.is_empty() {
                continue;
            }
            if self.archive_skip > 0 {
                self.archive_skip -= 1;
                continue;
            }
            self.archive_remaining -= 1;
            return Some(Ok(line));
        }
    }

    fn next_active(&mut self) -> Option<io::Result<String>> {
        loop {
            match self.active.next()? {
                Ok(line) if line.is_empty() => continue,
                other => return Some(other),
            }
        }
    }
}

impl Iterator for EntryIter {
    type Item = io::Result<(Entry, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.next_archived() {
            Some(line) => line,
            None => self.next_active()?,
        };
        Some(line.and_then(|line| {
            let hash = line_hash(line.as_bytes());
            let entry: Entry = serde_json::from_str(&line).map_err(invalid_data)?;
            Ok((entry, hash))
        }))
    }
}
