//! Turning one patch into an edit of the visible order.
//!
//! Every patch kind reduces to the same shape: remove a contiguous run of
//! visible entries and insert zero or more new events where it was. The
//! resolver computes that edit against an [`AliveIndex`] without touching
//! it, so the same function serves both validation before append and the
//! fold itself.

use crate::error::PatchError;
use crate::event::{Event, EventId, Patch};
use crate::index::{AliveIndex, Liveness};

/// The edit a patch makes to the visible order.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Visible position where the edit starts.
    pub at: usize,
    /// Number of alive entries that become dead.
    pub remove: usize,
    /// Events inserted at `at`, in order.
    pub inject: Vec<Event>,
}

impl Resolution {
    /// An edit that changes nothing.
    pub fn noop() -> Self {
        Resolution {
            at: 0,
            remove: 0,
            inject: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.remove == 0 && self.inject.is_empty()
    }
}

/// Resolve `patch` against the current visible order.
///
/// Pure: the index is not modified. Apply the result with
/// [`AliveIndex::apply`].
///
/// # Errors
///
/// - [`PatchError::Range`] if a splice or summarize range does not fit the
///   visible log.
/// - [`PatchError::Target`] if `TruncateBefore` names an entry that is not
///   alive, or an anchor does not match the entry at `start`.
///
/// # Examples
///
/// ```
/// use patchfold::{AliveIndex, Event, Patch, resolve};
/// use serde_json::json;
///
/// let mut index = AliveIndex::new();
/// for id in 1..=3 {
///     let mut event = Event::new("msg", json!({}));
///     event.id = id;
///     index.push(event);
/// }
///
/// let resolution = resolve(&index, &Patch::truncate_before(3)).unwrap();
/// index.apply(resolution);
/// assert_eq!(index.visible_ids(), &[3]);
///
/// assert!(resolve(&index, &Patch::splice(5, 1, vec![])).is_err());
/// ```
pub fn resolve(index: &AliveIndex, patch: &Patch) -> Result<Resolution, PatchError> {
    match patch {
        Patch::Splice {
            start,
            count,
            replacement,
            anchor,
        } => {
            let (at, remove) = check_range(index, *start, *count)?;
            check_anchor(index, at, *anchor)?;
            Ok(Resolution {
                at,
                remove,
                inject: replacement.clone(),
            })
        }
        Patch::TruncateBefore { event_id } => {
            let target = alive_position(index, *event_id)?;
            Ok(Resolution {
                at: 0,
                remove: target,
                inject: Vec::new(),
            })
        }
        Patch::Summarize {
            start,
            count,
            summary,
            anchor,
        } => {
            let (at, remove) = check_range(index, *start, *count)?;
            check_anchor(index, at, *anchor)?;
            Ok(Resolution {
                at,
                remove,
                inject: vec![summary.clone()],
            })
        }
        Patch::Unknown => Ok(Resolution::noop()),
    }
}

fn check_range(index: &AliveIndex, start: u64, count: u64) -> Result<(usize, usize), PatchError> {
    let visible_len = index.len() as u64;
    let fits = start <= visible_len
        && start
            .checked_add(count)
            .is_some_and(|end| end <= visible_len);
    if !fits {
        return Err(PatchError::Range {
            start,
            count,
            visible_len,
        });
    }
    Ok((start as usize, count as usize))
}

fn check_anchor(index: &AliveIndex, at: usize, anchor: Option<EventId>) -> Result<(), PatchError> {
    let Some(event_id) = anchor else {
        return Ok(());
    };
    let found = alive_position(index, event_id)?;
    if found != at {
        return Err(PatchError::Target {
            event_id,
            reason: format!("anchored at visible position {at} but found at {found}"),
        });
    }
    Ok(())
}

fn alive_position(index: &AliveIndex, event_id: EventId) -> Result<usize, PatchError> {
    match index.liveness(event_id) {
        Liveness::Alive(pos) => Ok(pos),
        Liveness::Dead => Err(PatchError::Target {
            event_id,
            reason: "already removed from the visible log".to_string(),
        }),
        Liveness::Unknown => Err(PatchError::Target {
            event_id,
            reason: "no visible event has this id".to_string(),
        }),
    }
}
