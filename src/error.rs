use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Details of a failed conditional append.
///
/// Returned inside [`Error::ConcurrentAppendConflict`] when the caller's
/// expected length no longer matches the audit log. The caller decides
/// whether to re-read and retry; nothing is retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendConflict {
    /// Length the caller expected the log to have.
    pub expected_len: u64,
    /// Length the log actually had when the append was attempted.
    pub actual_len: u64,
}

impl fmt::Display for AppendConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected log length {}, found {}",
            self.expected_len, self.actual_len
        )
    }
}

/// Why a patch cannot be applied to the current visible log.
///
/// Produced by [`resolve`](crate::resolve::resolve). Converts into
/// [`Error::PatchRange`] or [`Error::PatchTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// `start` or `start + count` lies outside the visible log.
    #[error("range {start}..{start}+{count} is outside the visible log of length {visible_len}")]
    Range {
        start: u64,
        count: u64,
        visible_len: u64,
    },

    /// The referenced identifier is not a currently alive entry.
    #[error("event {event_id} is not a valid target: {reason}")]
    Target { event_id: u64, reason: String },
}

/// Errors returned by the public session and store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A conditional append lost against another writer.
    #[error("concurrent append conflict: {0}")]
    ConcurrentAppendConflict(AppendConflict),

    /// A splice or summarize range falls outside the visible log.
    #[error("patch range {start}..{start}+{count} is outside the visible log of length {visible_len}")]
    PatchRange {
        start: u64,
        count: u64,
        visible_len: u64,
    },

    /// A patch references an identifier that is not currently alive.
    #[error("patch target {event_id} rejected: {reason}")]
    PatchTarget { event_id: u64, reason: String },

    /// A persisted snapshot failed integrity validation.
    #[error("corrupt snapshot {}: {reason}", .path.display())]
    CorruptSnapshot { path: PathBuf, reason: String },

    /// Storage failure, surfaced unmodified.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<PatchError> for Error {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::Range {
                start,
                count,
                visible_len,
            } => Error::PatchRange {
                start,
                count,
                visible_len,
            },
            PatchError::Target { event_id, reason } => Error::PatchTarget { event_id, reason },
        }
    }
}

impl From<AppendConflict> for Error {
    fn from(conflict: AppendConflict) -> Self {
        Error::ConcurrentAppendConflict(conflict)
    }
}

/// Shorthand result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
