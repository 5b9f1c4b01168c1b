//! Context window: keep a chat transcript under a size limit.
//!
//! Appends a conversation, then plays the role of a compactor: once more
//! than six messages are visible, the oldest four are replaced by a single
//! summary. The raw log keeps every original message; only the visible
//! log shrinks. A restart at the end resumes from the newest snapshot.

use patchfold::{Event, Patch, Session};
use serde_json::json;

const WINDOW: usize = 6;

fn message(role: &str, text: &str) -> Event {
    Event::new("message", json!({"role": role, "text": text})).with_actor(role)
}

fn print_view(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let view = session.get_visible()?;
    println!("-- visible at raw position {} --", view.position);
    for event in view.visible() {
        println!(
            "  #{:<3} {:<9} {}",
            event.id,
            event.data["role"].as_str().unwrap_or("?"),
            event.data["text"].as_str().unwrap_or("")
        );
    }
    println!("  state: {}", serde_json::to_string(view.state())?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let session = Session::builder(dir.path()).snapshot_every(8).open()?;

    let turns = [
        ("user", "Hi, I'm planning a trip to Lisbon."),
        ("assistant", "Nice! When are you going?"),
        ("user", "Early May, for five days."),
        ("assistant", "May is a great time. Any interests?"),
        ("user", "Food and old neighbourhoods."),
        ("assistant", "Then Alfama and a tasca or two are a must."),
        ("user", "What about day trips?"),
        ("assistant", "Sintra is the classic one."),
        ("user", "Is it doable by train?"),
    ];

    for (role, text) in turns {
        let mut event = message(role, text);
        if text.contains("May") {
            event = event.with_delta("travel_month", json!("May"));
        }
        session.append_event(event)?;

        let view = session.get_visible()?;
        if view.visible_len() > WINDOW {
            // Anchor on the first visible id so a stale plan can't summarize
            // the wrong range.
            let first = view.index.id_at(0).unwrap_or_default();
            let summary = message("summary", "Planning a May trip to Lisbon; food, old town.")
                .with_delta("travel_month", json!("May"))
                .with_delta("destination", json!("Lisbon"));
            let patch_id =
                session.apply_patch(Patch::summarize(0, 4, summary).with_anchor(first))?;
            println!("compacted with patch #{patch_id}");
        }
    }

    print_view(&session)?;
    println!(
        "raw log: {} entries, snapshots at {:?}",
        session.len(),
        session
            .snapshots()
            .list()?
            .into_iter()
            .map(|(p, _)| p)
            .collect::<Vec<_>>()
    );

    drop(session);
    let session = Session::builder(dir.path()).snapshot_every(8).open()?;
    println!("\nafter restart:");
    print_view(&session)?;

    Ok(())
}
