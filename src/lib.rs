mod archive;
mod cache;
mod config;
mod error;
mod event;
mod fold;
mod index;
mod log;
pub mod resolve;
mod session;
pub mod snapshot;
mod store;

pub use cache::MaterializationCache;
pub use config::SessionConfig;
pub use error::{AppendConflict, Error, PatchError, Result};
pub use event::{Entry, Event, EventId, Patch, PatchEvent, StateDelta};
pub use fold::{fold, fold_all, fold_into, replay_state, Materialized, State};
pub use index::{AliveIndex, Liveness};
pub use crate::log::{
    line_hash, AppendResult, EntryIter, EventReader, EventWriter, LockMode, ARCHIVE_FILE, LOG_FILE,
};
pub use resolve::{resolve, Resolution};
pub use session::{Session, SessionBuilder, SNAPSHOTS_DIR};
pub use snapshot::{Snapshot, SnapshotManager};
pub use store::SessionStore;
