//! Multi writer: several threads sharing one session.
//!
//! Two producers append messages while a compactor thread keeps trimming
//! the front of the visible log with `TruncateBefore`, and a reader polls
//! the visible log. A second compactor uses `apply_patch_if` and retries
//! when the log moved under it.

use patchfold::{Error, Event, Patch, SessionStore};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const KEEP: usize = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(SessionStore::open(dir.path())?);
    let session = store.session("shared")?;

    let producers: Vec<_> = ["alice", "bob"]
        .into_iter()
        .map(|name| {
            let session = Arc::clone(&session);
            thread::spawn(move || -> patchfold::Result<()> {
                for i in 0..20 {
                    session.append_event(
                        Event::new("message", json!({"text": format!("{name} {i}")}))
                            .with_actor(name)
                            .with_delta(format!("last_{name}"), json!(i)),
                    )?;
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
        })
        .collect();

    let compactor = {
        let session = Arc::clone(&session);
        thread::spawn(move || -> patchfold::Result<u32> {
            let mut patches = 0;
            for _ in 0..30 {
                let view = session.get_visible()?;
                if view.visible_len() > KEEP {
                    let ids = view.index.visible_ids();
                    let keep_from = ids[ids.len() - KEEP];
                    // The cut id may already be gone if the other compactor won.
                    match session.apply_patch(Patch::truncate_before(keep_from)) {
                        Ok(_) => patches += 1,
                        Err(Error::PatchTarget { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                thread::sleep(Duration::from_millis(7));
            }
            Ok(patches)
        })
    };

    let conditional = {
        let session = Arc::clone(&session);
        thread::spawn(move || -> patchfold::Result<u32> {
            let mut conflicts = 0;
            for _ in 0..10 {
                let view = session.get_visible()?;
                if view.visible_len() < 2 {
                    thread::sleep(Duration::from_millis(5));
                    continue;
                }
                let summary = Event::new("message", json!({"text": "earlier messages"}));
                match session.apply_patch_if(
                    Patch::summarize(0, 2, summary),
                    view.position,
                ) {
                    Ok(_) => {}
                    Err(Error::ConcurrentAppendConflict(conflict)) => {
                        conflicts += 1;
                        println!("[conditional] retrying: {conflict}");
                    }
                    Err(e) => return Err(e),
                }
                thread::sleep(Duration::from_millis(11));
            }
            Ok(conflicts)
        })
    };

    let reader = {
        let session = Arc::clone(&session);
        thread::spawn(move || -> patchfold::Result<()> {
            let mut last = 0;
            for _ in 0..10 {
                let view = session.get_visible()?;
                if view.position != last {
                    println!(
                        "[reader] position {:>3}: {} visible",
                        view.position,
                        view.visible_len()
                    );
                    last = view.position;
                }
                thread::sleep(Duration::from_millis(15));
            }
            Ok(())
        })
    };

    for producer in producers {
        producer.join().map_err(|_| "producer panicked")??;
    }
    let patches = compactor.join().map_err(|_| "compactor panicked")??;
    let conflicts = conditional.join().map_err(|_| "conditional panicked")??;
    reader.join().map_err(|_| "reader panicked")??;

    let view = session.get_visible()?;
    println!("\n{patches} truncations, {conflicts} conditional conflicts");
    println!(
        "raw log: {} entries; visible: {} events",
        session.len(),
        view.visible_len()
    );
    for event in view.visible() {
        println!("  #{:<3} {}", event.id, event.data["text"]);
    }
    println!("state: {}", serde_json::to_string(view.state())?);
    println!("sessions on disk: {:?}", store.session_names()?);

    Ok(())
}
