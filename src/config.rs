use crate::log::LockMode;
use serde::{Deserialize, Serialize};

/// Tuning knobs for a [`Session`](crate::Session).
///
/// Deserializable so an owning service can embed it in its own config file;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Write a snapshot once this many raw entries have been folded since
    /// the last one. `0` disables automatic snapshots.
    pub snapshot_every: u64,

    /// How many snapshots to retain. Older ones are fallbacks if the newest
    /// turns out corrupt.
    pub keep_snapshots: usize,

    /// Writer locking for the session directory.
    pub lock_mode: LockMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            snapshot_every: 256,
            keep_snapshots: 2,
            lock_mode: LockMode::Flock,
        }
    }
}
