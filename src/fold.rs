use crate::event::{Entry, Event, StateDelta};
use crate::index::AliveIndex;
use crate::resolve::resolve;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Derived key/value state.
pub type State = BTreeMap<String, Value>;

/// The result of folding a prefix of the audit log.
///
/// `position` is the number of raw entries folded. Because the log only
/// grows, a `Materialized` stays a valid starting point for every later
/// fold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Materialized {
    pub position: u64,
    pub index: AliveIndex,
    pub state: State,
}

impl Materialized {
    /// The fold of an empty log.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Visible events in order.
    pub fn visible(&self) -> impl Iterator<Item = &Event> + '_ {
        self.index.visible()
    }

    /// Owned copy of the visible log.
    pub fn visible_log(&self) -> Vec<Event> {
        self.index.visible().cloned().collect()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Number of visible events.
    pub fn visible_len(&self) -> usize {
        self.index.len()
    }
}

fn apply_delta(state: &mut State, delta: &StateDelta) {
    for (key, value) in delta {
        state.insert(key.clone(), value.clone());
    }
}

/// Replay state deltas in order, last write wins per key.
pub fn replay_state<'a>(events: impl IntoIterator<Item = &'a Event>) -> State {
    let mut state = State::new();
    for event in events {
        apply_delta(&mut state, &event.delta);
    }
    state
}

/// Fold raw entries on top of an earlier result.
///
/// `entries` must be the raw log starting at `start.position`. Plain events
/// join the end of the visible order; patches are resolved in order, each
/// against the visible log as left by everything before it.
///
/// Never fails. A patch that does not resolve (it was appended without
/// validation) is skipped and logged.
///
/// `start` is left untouched, which costs a copy of it. Use [`fold_into`]
/// to extend a value you own.
pub fn fold<I>(entries: I, start: &Materialized) -> Materialized
where
    I: IntoIterator<Item = Entry>,
{
    let mut next = start.clone();
    fold_into(&mut next, entries);
    next
}

/// Fold raw entries into `materialized` in place.
///
/// Same semantics as [`fold`]; the work is proportional to the suffix
/// unless a patch forces a state replay.
///
/// The resulting state is always the replay of the surviving events' deltas
/// in visible order. When the suffix holds only plain events, that equals
/// the previous state with the new deltas applied, so the previous state is
/// reused; any effective patch triggers a replay of the visible log.
pub fn fold_into<I>(materialized: &mut Materialized, entries: I)
where
    I: IntoIterator<Item = Entry>,
{
    let next = materialized;
    let mut replay = false;
    let mut folded = 0u64;

    for entry in entries {
        match entry {
            Entry::Event(event) => {
                if !replay {
                    apply_delta(&mut next.state, &event.delta);
                }
                next.index.push(event);
            }
            Entry::Patch(patch) => match resolve(&next.index, &patch.patch) {
                Ok(resolution) if resolution.is_noop() => {
                    debug!(
                        "patchfold: {} patch {} at position {} changes nothing",
                        patch.patch.kind(),
                        patch.id,
                        patch.position
                    );
                }
                Ok(resolution) => {
                    next.index.apply(resolution);
                    replay = true;
                }
                Err(e) => {
                    warn!(
                        "patchfold: skipping {} patch {} at position {}: {e}",
                        patch.patch.kind(),
                        patch.id,
                        patch.position
                    );
                }
            },
        }
        folded += 1;
    }

    if replay {
        next.state = replay_state(next.index.visible());
    }
    next.position += folded;
    debug!(
        "patchfold: folded {folded} entries to position {}, {} visible",
        next.position,
        next.index.len()
    );
}

/// Fold a whole log from position 0.
pub fn fold_all<I>(entries: I) -> Materialized
where
    I: IntoIterator<Item = Entry>,
{
    let mut m = Materialized::empty();
    fold_into(&mut m, entries);
    m
}
