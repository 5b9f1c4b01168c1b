#![allow(dead_code)]

use patchfold::{Entry, Event, EventReader, EventWriter, Materialized, Patch, PatchEvent, Session};
use serde_json::{json, Value};

pub fn msg(text: &str) -> Event {
    Event::new("message", json!({"text": text}))
}

pub fn msg_with(text: &str, key: &str, value: Value) -> Event {
    msg(text).with_delta(key, value)
}

pub fn texts(view: &Materialized) -> Vec<String> {
    view.visible()
        .map(|e| e.data["text"].as_str().unwrap_or("").to_string())
        .collect()
}

pub fn append_texts(session: &Session, texts: &[&str]) -> Vec<u64> {
    texts
        .iter()
        .map(|t| session.append_event(msg(t)).unwrap())
        .collect()
}

pub fn append_n(writer: &mut EventWriter, n: usize) {
    for i in 0..n {
        writer.append(msg(&format!("event_{i}"))).unwrap();
    }
}

pub fn read_all(reader: &EventReader) -> Vec<Entry> {
    reader
        .read_full()
        .unwrap()
        .map(|r| r.map(|(entry, _)| entry))
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// An in-memory raw log stamped the way the writer stamps entries.
#[derive(Debug, Clone, Default)]
pub struct RawLog {
    pub entries: Vec<Entry>,
    next_id: u64,
}

impl RawLog {
    pub fn new() -> Self {
        RawLog {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn event(&mut self, mut event: Event) -> u64 {
        event.id = self.next_id;
        event.position = self.entries.len() as u64;
        self.next_id += 1;
        self.entries.push(Entry::Event(event));
        self.next_id - 1
    }

    pub fn text(&mut self, text: &str) -> u64 {
        self.event(msg(text))
    }

    pub fn patch(&mut self, patch: Patch) -> u64 {
        let position = self.entries.len() as u64;
        let mut patch = PatchEvent::new(patch);
        patch.id = self.next_id;
        patch.position = position;
        self.next_id += 1;
        let mut stamp = |e: &mut Event| {
            e.id = self.next_id;
            e.position = position;
            self.next_id += 1;
        };
        match &mut patch.patch {
            Patch::Splice { replacement, .. } => replacement.iter_mut().for_each(&mut stamp),
            Patch::Summarize { summary, .. } => stamp(summary),
            _ => {}
        }
        let id = patch.id;
        self.entries.push(Entry::Patch(patch));
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
