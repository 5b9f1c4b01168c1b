//! Snapshot persistence for folded sessions.

use crate::error::{Error, Result};
use crate::fold::{Materialized, State};
use crate::index::AliveIndex;
use crate::log::EventReader;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const SUFFIX: &str = ".snapshot.json";

/// A persisted, fully folded checkpoint.
///
/// Written atomically (via a `.tmp` + rename) as JSON wrapped in an
/// envelope carrying an xxh64 checksum of the snapshot body:
///
/// ```text
/// $ cat snapshots/00000000000000000512.snapshot.json | jq .
/// {
///   "checksum": "5c1f0e2d9a7b3c41",
///   "snapshot": {
///     "position": 512,
///     "hash": "a3f2e1b09c4d...",
///     "index": { "order": [...], "arena": {...}, "dead": [...] },
///     "state": { "turns": 42 }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Snapshot {
    /// Number of raw entries folded into this snapshot.
    pub position: u64,

    /// Hex-encoded xxh64 hash of the raw line at `position - 1`, empty at
    /// position 0. Ties the snapshot to the exact log it was folded from.
    pub hash: String,

    pub index: AliveIndex,
    pub state: State,
}

impl Snapshot {
    pub fn new(materialized: &Materialized, hash: String) -> Self {
        Snapshot {
            position: materialized.position,
            hash,
            index: materialized.index.clone(),
            state: materialized.state.clone(),
        }
    }

    pub fn into_materialized(self) -> Materialized {
        Materialized {
            position: self.position,
            index: self.index,
            state: self.state,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    snapshot: Value,
}

// The body is checksummed in serde_json's canonical form (sorted object
// keys), so the check does not depend on how the file was formatted.
fn checksum(body: &Value) -> io::Result<String> {
    let bytes =
        serde_json::to_vec(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(format!("{:016x}", xxhash_rust::xxh64::xxh64(&bytes, 0)))
}

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::CorruptSnapshot {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Save a snapshot atomically to disk.
///
/// Writes to a `.tmp` file first, syncs, then renames to the final path.
/// If the process crashes mid-write, the old snapshot file survives intact.
pub fn save(path: &Path, snapshot: &Snapshot) -> io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    let body = serde_json::to_value(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let envelope = Envelope {
        checksum: checksum(&body)?,
        snapshot: body,
    };
    let json = serde_json::to_string_pretty(&envelope)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a snapshot from disk.
///
/// Returns `Ok(None)` if the file doesn't exist.
///
/// # Errors
///
/// [`Error::CorruptSnapshot`] if the file does not parse or its checksum
/// does not match; [`Error::Io`] if it cannot be read.
pub fn load(path: &Path) -> Result<Option<Snapshot>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let envelope: Envelope =
        serde_json::from_str(&contents).map_err(|e| corrupt(path, e.to_string()))?;
    let actual = checksum(&envelope.snapshot)?;
    if actual != envelope.checksum {
        return Err(corrupt(
            path,
            format!("checksum {actual} does not match recorded {}", envelope.checksum),
        ));
    }
    let snapshot =
        serde_json::from_value(envelope.snapshot).map_err(|e| corrupt(path, e.to_string()))?;
    Ok(Some(snapshot))
}

/// Delete a snapshot file and its `.tmp` file if present.
///
/// Idempotent: missing files are not an error.
pub fn delete(path: &Path) -> io::Result<()> {
    for p in [path.to_path_buf(), path.with_extension("json.tmp")] {
        match fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Keeps a session's snapshots: where they live, how many to retain, and
/// which one a cold fold should start from.
#[derive(Debug)]
pub struct SnapshotManager {
    dir: PathBuf,
    keep: usize,
    last_position: AtomicU64,
    write_lock: Mutex<()>,
}

impl SnapshotManager {
    /// Manage snapshots in `dir`, retaining the newest `keep` (at least one).
    pub fn new(dir: impl AsRef<Path>, keep: usize) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(SnapshotManager {
            dir,
            keep: keep.max(1),
            last_position: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot for a given position.
    pub fn path_for(&self, position: u64) -> PathBuf {
        self.dir.join(format!("{position:020}{SUFFIX}"))
    }

    /// Position of the newest snapshot written or loaded by this manager.
    pub fn last_position(&self) -> u64 {
        self.last_position.load(Ordering::Acquire)
    }

    /// Snapshot files on disk, newest first.
    pub fn list(&self) -> io::Result<Vec<(u64, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(position) = name
                .to_str()
                .and_then(|n| n.strip_suffix(SUFFIX))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            found.push((position, entry.path()));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }

    /// Persist `materialized` and prune snapshots beyond the retention
    /// count. Position 0 is never written. Returns the snapshot path.
    pub fn save(&self, materialized: &Materialized, reader: &EventReader) -> Result<Option<PathBuf>> {
        if materialized.position == 0 {
            return Ok(None);
        }
        let _guard = self.write_lock.lock();

        let hash = reader
            .line_hash_at(materialized.position - 1)?
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "patchfold: cannot snapshot position {} beyond log end {}",
                        materialized.position,
                        reader.len()
                    ),
                )
            })?;
        let path = self.path_for(materialized.position);
        save(&path, &Snapshot::new(materialized, hash))?;
        self.last_position
            .fetch_max(materialized.position, Ordering::AcqRel);
        info!(
            "patchfold: wrote snapshot at position {} ({} visible)",
            materialized.position,
            materialized.visible_len()
        );

        self.prune()?;
        Ok(Some(path))
    }

    /// Delete all but the newest `keep` snapshots.
    pub fn prune(&self) -> io::Result<()> {
        for (position, path) in self.list()?.into_iter().skip(self.keep) {
            debug!("patchfold: pruning snapshot at position {position}");
            delete(&path)?;
        }
        Ok(())
    }

    /// The best starting point for a fold that must reach at most
    /// `max_position`.
    ///
    /// Walks snapshots newest first and returns the first one that loads,
    /// passes its checksum, and still matches the log. Corrupt or stale
    /// snapshots are skipped with a warning. Falls back to the empty fold at
    /// position 0.
    pub fn latest(&self, reader: &EventReader, max_position: u64) -> Result<Materialized> {
        for (position, path) in self.list()? {
            if position == 0 || position > max_position {
                continue;
            }
            let snapshot = match load(&path) {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(Error::CorruptSnapshot { reason, .. }) => {
                    warn!(
                        "patchfold: skipping corrupt snapshot {}: {reason}",
                        path.display()
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            if snapshot.position != position {
                warn!(
                    "patchfold: skipping snapshot {}: records position {}",
                    path.display(),
                    snapshot.position
                );
                continue;
            }
            match reader.line_hash_at(position - 1)? {
                Some(hash) if hash == snapshot.hash => {}
                Some(_) => {
                    warn!(
                        "patchfold: skipping snapshot {}: hash mismatch with log",
                        path.display()
                    );
                    continue;
                }
                None => {
                    warn!(
                        "patchfold: skipping snapshot {}: position is beyond log end {}",
                        path.display(),
                        reader.len()
                    );
                    continue;
                }
            }
            debug!("patchfold: resuming fold from snapshot at position {position}");
            self.last_position.fetch_max(position, Ordering::AcqRel);
            return Ok(snapshot.into_materialized());
        }
        debug!("patchfold: no usable snapshot, folding from position 0");
        Ok(Materialized::empty())
    }
}
