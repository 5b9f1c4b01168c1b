use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Key/value changes carried by one event.
///
/// Replayed in visible order; a later delta for the same key wins.
pub type StateDelta = BTreeMap<String, Value>;

/// Stable identifier of an entry, assigned at append time and never reused.
pub type EventId = u64;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An immutable event record.
///
/// `id` and `position` are assigned by the [`EventWriter`](crate::EventWriter)
/// when the event is appended; whatever the caller puts there is overwritten.
/// Events injected by a patch (splice replacements, summaries) carry the
/// position of the patch that introduced them.
///
/// The `data` payload is opaque to the log. The `delta` is what the fold
/// replays into the derived state.
///
/// # Examples
///
/// ```
/// use patchfold::Event;
/// use serde_json::json;
///
/// let event = Event::new("user_message", json!({"text": "hi"}))
///     .with_delta("turns", json!(1))
///     .with_actor("user_42");
/// assert_eq!(event.event_type, "user_message");
/// assert_eq!(event.delta["turns"], 1);
/// assert_eq!(event.actor, Some("user_42".to_string()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct Event {
    /// Unique identifier, strictly increasing in append order.
    #[serde(default)]
    pub id: EventId,

    /// Raw append position (index in the audit log).
    #[serde(default)]
    pub position: u64,

    /// Unix timestamp in seconds, auto-populated by [`Event::new`].
    #[serde(default)]
    pub ts: u64,

    /// The event type identifier (e.g. `"user_message"`).
    ///
    /// Serialized as `"type"` in JSON.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary JSON payload.
    #[serde(default)]
    pub data: Value,

    /// State changes this event contributes while it is visible.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub delta: StateDelta,

    /// Identity of whoever caused this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Extensible metadata bag, kept apart from `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Event {
    /// Create a new event with the given type and payload.
    ///
    /// The timestamp is set to the current time. `id` and `position` stay
    /// zero until the event is appended.
    pub fn new(event_type: &str, data: Value) -> Self {
        Event {
            id: 0,
            position: 0,
            ts: now_secs(),
            event_type: event_type.to_string(),
            data,
            delta: StateDelta::new(),
            actor: None,
            meta: None,
        }
    }

    /// Add one key to the state delta. Setting the same key twice keeps the
    /// last value.
    pub fn with_delta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.delta.insert(key.into(), value);
        self
    }

    /// Replace the whole state delta.
    pub fn with_deltas(mut self, delta: StateDelta) -> Self {
        self.delta = delta;
        self
    }

    /// Set the actor that caused this event.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set extensible metadata.
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// A logical edit of the visible log.
///
/// Serialized with a `patch_type` tag and only the fields each kind needs.
/// A `patch_type` this version does not know deserializes as
/// [`Patch::Unknown`] and folds as a no-op, so newer writers can add kinds
/// without breaking older readers.
///
/// `start`/`count` address the visible log as it stands when the patch is
/// processed, after every earlier patch. `anchor`, when set, names the
/// identifier the writer expects at `start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "patch_type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Patch {
    /// Replace `count` visible entries at `start` with `replacement`.
    Splice {
        start: u64,
        count: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        replacement: Vec<Event>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor: Option<EventId>,
    },

    /// Hide every visible entry before `event_id`; `event_id` survives.
    TruncateBefore { event_id: EventId },

    /// Replace `count` visible entries at `start` with a single summary.
    Summarize {
        start: u64,
        count: u64,
        summary: Event,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor: Option<EventId>,
    },

    /// A patch kind written by a newer version. Kept in the audit log,
    /// ignored for visibility.
    #[serde(other)]
    Unknown,
}

impl Patch {
    /// A splice without an anchor.
    pub fn splice(start: u64, count: u64, replacement: Vec<Event>) -> Self {
        Patch::Splice {
            start,
            count,
            replacement,
            anchor: None,
        }
    }

    /// Hide everything before `event_id`.
    pub fn truncate_before(event_id: EventId) -> Self {
        Patch::TruncateBefore { event_id }
    }

    /// A summarize without an anchor.
    pub fn summarize(start: u64, count: u64, summary: Event) -> Self {
        Patch::Summarize {
            start,
            count,
            summary,
            anchor: None,
        }
    }

    /// Require the entry at `start` to be `event_id` when the patch is
    /// validated. Has no effect on `TruncateBefore`, which already addresses
    /// by identifier.
    pub fn with_anchor(mut self, event_id: EventId) -> Self {
        match &mut self {
            Patch::Splice { anchor, .. } | Patch::Summarize { anchor, .. } => {
                *anchor = Some(event_id);
            }
            Patch::TruncateBefore { .. } | Patch::Unknown => {}
        }
        self
    }

    /// Short name used in log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Patch::Splice { .. } => "splice",
            Patch::TruncateBefore { .. } => "truncate_before",
            Patch::Summarize { .. } => "summarize",
            Patch::Unknown => "unknown",
        }
    }

    /// Number of events this patch carries for injection.
    fn injected_len(&self) -> u64 {
        match self {
            Patch::Splice { replacement, .. } => replacement.len() as u64,
            Patch::Summarize { .. } => 1,
            Patch::TruncateBefore { .. } | Patch::Unknown => 0,
        }
    }
}

/// A patch as recorded in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct PatchEvent {
    #[serde(default)]
    pub id: EventId,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Identifiers this record consumes, its own included. Written so that a
    /// reader that does not know the patch kind still skips the identifiers
    /// of the events it injects. `0` on records that predate the field.
    #[serde(default)]
    pub id_span: u64,

    pub patch: Patch,
}

impl PatchEvent {
    /// Wrap a patch for appending. The timestamp is set to now.
    pub fn new(patch: Patch) -> Self {
        PatchEvent {
            id: 0,
            position: 0,
            ts: now_secs(),
            actor: None,
            id_span: 0,
            patch,
        }
    }

    /// Set the actor that issued this patch.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// One raw record of the audit log.
///
/// Serialized as a single JSON line with a `kind` tag:
///
/// ```text
/// {"kind":"event","id":1,"position":0,"ts":1700000000,"type":"user_message","data":{...}}
/// {"kind":"patch","id":4,"position":3,"ts":1700000001,"patch":{"patch_type":"truncate_before","event_id":2}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Event(Event),
    Patch(PatchEvent),
}

impl Entry {
    /// Identifier of the record itself.
    pub fn id(&self) -> EventId {
        match self {
            Entry::Event(e) => e.id,
            Entry::Patch(p) => p.id,
        }
    }

    /// Raw append position.
    pub fn position(&self) -> u64 {
        match self {
            Entry::Event(e) => e.position,
            Entry::Patch(p) => p.position,
        }
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Entry::Event(e) => Some(e),
            Entry::Patch(_) => None,
        }
    }

    pub fn as_patch(&self) -> Option<&PatchEvent> {
        match self {
            Entry::Patch(p) => Some(p),
            Entry::Event(_) => None,
        }
    }

    /// How many identifiers this entry consumes: itself plus any events it
    /// injects.
    pub(crate) fn id_span(&self) -> u64 {
        match self {
            Entry::Event(_) => 1,
            Entry::Patch(p) => p.id_span.max(1 + p.patch.injected_len()),
        }
    }

    /// Highest identifier used by this entry, including injected events.
    pub(crate) fn max_id(&self) -> EventId {
        match self {
            Entry::Event(e) => e.id,
            Entry::Patch(p) => {
                let injected = match &p.patch {
                    Patch::Splice { replacement, .. } => {
                        replacement.iter().map(|e| e.id).fold(p.id, u64::max)
                    }
                    Patch::Summarize { summary, .. } => p.id.max(summary.id),
                    Patch::TruncateBefore { .. } | Patch::Unknown => p.id,
                };
                injected.max((p.id + p.id_span).saturating_sub(1))
            }
        }
    }

    /// Assign identifiers starting at `first_id` and the given raw position.
    /// Injected events get the identifiers after the patch's own.
    pub(crate) fn stamp(&mut self, first_id: EventId, position: u64) {
        match self {
            Entry::Event(e) => {
                e.id = first_id;
                e.position = position;
            }
            Entry::Patch(p) => {
                p.id = first_id;
                p.position = position;
                p.id_span = 1 + p.patch.injected_len();
                let mut next = first_id + 1;
                let mut stamp_injected = |e: &mut Event| {
                    e.id = next;
                    e.position = position;
                    next += 1;
                };
                match &mut p.patch {
                    Patch::Splice { replacement, .. } => {
                        replacement.iter_mut().for_each(&mut stamp_injected);
                    }
                    Patch::Summarize { summary, .. } => stamp_injected(summary),
                    Patch::TruncateBefore { .. } | Patch::Unknown => {}
                }
            }
        }
    }
}

impl From<Event> for Entry {
    fn from(event: Event) -> Self {
        Entry::Event(event)
    }
}

impl From<PatchEvent> for Entry {
    fn from(patch: PatchEvent) -> Self {
        Entry::Patch(patch)
    }
}

impl From<Patch> for PatchEvent {
    fn from(patch: Patch) -> Self {
        PatchEvent::new(patch)
    }
}

impl From<Patch> for Entry {
    fn from(patch: Patch) -> Self {
        Entry::Patch(PatchEvent::new(patch))
    }
}
