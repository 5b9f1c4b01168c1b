//! Liveness bookkeeping for the fold.

use crate::event::{Event, EventId};
use crate::resolve::Resolution;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Where an identifier stands in the current fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Alive at the given visible position.
    Alive(usize),
    /// Was visible once, removed by a patch.
    Dead,
    /// Never seen by this fold (unknown, or a patch record).
    Unknown,
}

/// Alive/dead classification of every event the fold has seen.
///
/// An arena of alive events keyed by identifier, the visible order as a flat
/// list of identifiers, and the set of identifiers patches have removed.
/// The identifier → visible position map is derived and rebuilt on load, so
/// a snapshot stores only the flat parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexParts", into = "IndexParts")]
pub struct AliveIndex {
    arena: BTreeMap<EventId, Event>,
    order: Vec<EventId>,
    dead: BTreeSet<EventId>,
    slots: HashMap<EventId, usize>,
}

#[derive(Serialize, Deserialize)]
struct IndexParts {
    order: Vec<EventId>,
    arena: BTreeMap<EventId, Event>,
    #[serde(default)]
    dead: BTreeSet<EventId>,
}

impl TryFrom<IndexParts> for AliveIndex {
    type Error = String;

    fn try_from(parts: IndexParts) -> Result<Self, Self::Error> {
        if parts.order.len() != parts.arena.len() {
            return Err(format!(
                "visible order has {} ids but arena holds {} events",
                parts.order.len(),
                parts.arena.len()
            ));
        }
        if let Some(missing) = parts.order.iter().find(|id| !parts.arena.contains_key(id)) {
            return Err(format!("visible order references missing event {missing}"));
        }
        let mut index = AliveIndex {
            arena: parts.arena,
            order: parts.order,
            dead: parts.dead,
            slots: HashMap::new(),
        };
        index.renumber_from(0);
        if index.slots.len() != index.order.len() {
            return Err("visible order contains duplicate ids".to_string());
        }
        Ok(index)
    }
}

impl From<AliveIndex> for IndexParts {
    fn from(index: AliveIndex) -> Self {
        IndexParts {
            order: index.order,
            arena: index.arena,
            dead: index.dead,
        }
    }
}

impl AliveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of visible events.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn liveness(&self, id: EventId) -> Liveness {
        if let Some(&pos) = self.slots.get(&id) {
            Liveness::Alive(pos)
        } else if self.dead.contains(&id) {
            Liveness::Dead
        } else {
            Liveness::Unknown
        }
    }

    pub fn is_alive(&self, id: EventId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Visible position of an alive event.
    pub fn position_of(&self, id: EventId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    /// Identifier at a visible position.
    pub fn id_at(&self, position: usize) -> Option<EventId> {
        self.order.get(position).copied()
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.arena.get(&id)
    }

    /// Alive events in visible order.
    pub fn visible(&self) -> impl Iterator<Item = &Event> + '_ {
        self.order.iter().filter_map(move |id| self.arena.get(id))
    }

    /// Identifiers in visible order.
    pub fn visible_ids(&self) -> &[EventId] {
        &self.order
    }

    /// Identifiers removed by patches so far.
    pub fn dead_ids(&self) -> &BTreeSet<EventId> {
        &self.dead
    }

    /// Add an event at the end of the visible order.
    pub fn push(&mut self, event: Event) {
        let id = event.id;
        self.slots.insert(id, self.order.len());
        self.order.push(id);
        self.arena.insert(id, event);
    }

    /// Apply a resolved patch: kill the addressed range and insert the
    /// injected events in its place.
    ///
    /// The resolution must come from [`resolve`](crate::resolve::resolve)
    /// against this index.
    pub fn apply(&mut self, resolution: Resolution) {
        let Resolution { at, remove, inject } = resolution;
        let ids: Vec<EventId> = inject.iter().map(|e| e.id).collect();
        let removed: Vec<EventId> = self.order.splice(at..at + remove, ids).collect();
        for id in removed {
            self.arena.remove(&id);
            self.slots.remove(&id);
            self.dead.insert(id);
        }
        for event in inject {
            self.arena.insert(event.id, event);
        }
        self.renumber_from(at);
    }

    fn renumber_from(&mut self, from: usize) {
        for (pos, id) in self.order.iter().enumerate().skip(from) {
            self.slots.insert(*id, pos);
        }
    }
}
