mod common;

use common::{append_texts, msg, msg_with, texts, RawLog};
use patchfold::snapshot::{self, Snapshot};
use patchfold::{fold_all, Error, EventWriter, Patch, Session, SnapshotManager, SNAPSHOTS_DIR};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

fn sample_view() -> patchfold::Materialized {
    let mut log = RawLog::new();
    log.event(msg_with("a", "k", json!(1)));
    log.text("b");
    log.patch(Patch::splice(0, 1, vec![msg("r")]));
    fold_all(log.entries)
}

fn manual_session(dir: &std::path::Path) -> Session {
    Session::builder(dir).snapshot_every(0).open().unwrap()
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.snapshot.json");
    let snap = Snapshot::new(&sample_view(), "abcdef0123456789".into());

    snapshot::save(&path, &snap).unwrap();
    let loaded = snapshot::load(&path).unwrap().unwrap();

    assert_eq!(loaded, snap);
    assert_eq!(loaded.into_materialized(), sample_view());
}

#[test]
fn test_load_nonexistent() {
    let dir = tempdir().unwrap();
    let loaded = snapshot::load(&dir.path().join("missing.snapshot.json")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_no_tmp_file_after_save() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.snapshot.json");
    snapshot::save(&path, &Snapshot::new(&sample_view(), String::new())).unwrap();

    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_tampered_state_fails_checksum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.snapshot.json");
    snapshot::save(&path, &Snapshot::new(&sample_view(), String::new())).unwrap();

    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    value["snapshot"]["state"]["k"] = json!(999);
    fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    match snapshot::load(&path) {
        Err(Error::CorruptSnapshot { reason, .. }) => {
            assert!(reason.contains("checksum"), "{reason}")
        }
        other => panic!("expected CorruptSnapshot, got {other:?}"),
    }
}

#[test]
fn test_garbage_file_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.snapshot.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        snapshot::load(&path),
        Err(Error::CorruptSnapshot { .. })
    ));
}

#[test]
fn test_reformatting_keeps_checksum_valid() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.snapshot.json");
    snapshot::save(&path, &Snapshot::new(&sample_view(), String::new())).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    assert!(snapshot::load(&path).unwrap().is_some());
}

#[test]
fn test_delete_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.snapshot.json");
    snapshot::save(&path, &Snapshot::new(&sample_view(), String::new())).unwrap();

    snapshot::delete(&path).unwrap();
    assert!(!path.exists());
    snapshot::delete(&path).unwrap();
}

#[test]
fn test_session_snapshot_and_cold_resume() {
    let dir = tempdir().unwrap();
    let position;
    {
        let session = manual_session(dir.path());
        append_texts(&session, &["a", "b", "c", "d"]);
        session
            .apply_patch(Patch::summarize(0, 2, msg("ab")))
            .unwrap();
        position = session.snapshot().unwrap();
        append_texts(&session, &["e"]);
    }
    assert_eq!(position, 5);

    let session = manual_session(dir.path());
    let view = session.get_visible().unwrap();
    assert_eq!(session.snapshots().last_position(), 5);
    assert_eq!(texts(&view), vec!["ab", "c", "d", "e"]);
    assert_eq!(*view, fold_all(session.get_raw().unwrap()));
}

#[test]
fn test_snapshot_cadence_and_retention() {
    let dir = tempdir().unwrap();
    let session = Session::builder(dir.path())
        .snapshot_every(5)
        .keep_snapshots(2)
        .open()
        .unwrap();
    let positions = |s: &Session| -> Vec<u64> {
        s.snapshots().list().unwrap().into_iter().map(|(p, _)| p).collect()
    };

    for i in 0..12 {
        session.append_event(msg(&format!("m{i}"))).unwrap();
    }
    session.get_visible().unwrap();
    assert_eq!(positions(&session), vec![12]);

    append_texts(&session, &["x", "y", "z"]);
    session.get_visible().unwrap();
    assert_eq!(positions(&session), vec![12], "3 < 5 entries since last");

    append_texts(&session, &["p", "q"]);
    session.get_visible().unwrap();
    assert_eq!(positions(&session), vec![17, 12]);

    for i in 0..5 {
        session.append_event(msg(&format!("n{i}"))).unwrap();
    }
    session.get_visible().unwrap();
    assert_eq!(positions(&session), vec![22, 17], "oldest pruned");
}

#[test]
fn test_failed_automatic_snapshot_keeps_reads_working() {
    let dir = tempdir().unwrap();
    let session = Session::builder(dir.path())
        .snapshot_every(2)
        .open()
        .unwrap();
    append_texts(&session, &["a"]);
    session.get_visible().unwrap();

    let snapshots = dir.path().join(SNAPSHOTS_DIR);
    fs::remove_dir_all(&snapshots).unwrap();
    fs::write(&snapshots, b"not a directory").unwrap();

    append_texts(&session, &["b"]);
    let view = session.get_visible().unwrap();
    assert_eq!(texts(&view), vec!["a", "b"]);

    append_texts(&session, &["c", "d"]);
    let view = session.get_visible().unwrap();
    assert_eq!(texts(&view), vec!["a", "b", "c", "d"]);
    assert_eq!(session.snapshots().last_position(), 0);

    assert!(session.snapshot().is_err(), "explicit snapshots still report");
}

#[test]
fn test_corrupt_newest_falls_back_to_previous() {
    let dir = tempdir().unwrap();
    {
        let session = manual_session(dir.path());
        append_texts(&session, &["a", "b", "c"]);
        session.snapshot().unwrap();
        session.apply_patch(Patch::truncate_before(2)).unwrap();
        append_texts(&session, &["d"]);
        session.snapshot().unwrap();
    }

    let manager = SnapshotManager::new(dir.path().join(SNAPSHOTS_DIR), 2).unwrap();
    fs::write(manager.path_for(5), "garbage").unwrap();

    let session = manual_session(dir.path());
    let view = session.get_visible().unwrap();
    assert_eq!(session.snapshots().last_position(), 3);
    assert_eq!(texts(&view), vec!["b", "c", "d"]);
}

#[test]
fn test_all_snapshots_corrupt_folds_from_zero() {
    let dir = tempdir().unwrap();
    {
        let session = manual_session(dir.path());
        append_texts(&session, &["a", "b"]);
        session.snapshot().unwrap();
    }
    let manager = SnapshotManager::new(dir.path().join(SNAPSHOTS_DIR), 2).unwrap();
    fs::write(manager.path_for(2), "{}").unwrap();

    let session = manual_session(dir.path());
    let view = session.get_visible().unwrap();
    assert_eq!(session.snapshots().last_position(), 0);
    assert_eq!(texts(&view), vec!["a", "b"]);
}

#[test]
fn test_snapshot_from_other_log_is_rejected() {
    let source = tempdir().unwrap();
    let target = tempdir().unwrap();
    {
        let session = manual_session(source.path());
        append_texts(&session, &["x", "y"]);
        session.snapshot().unwrap();
    }
    {
        let session = manual_session(target.path());
        append_texts(&session, &["a", "b", "c"]);
    }
    let name = "00000000000000000002.snapshot.json";
    fs::copy(
        source.path().join(SNAPSHOTS_DIR).join(name),
        target.path().join(SNAPSHOTS_DIR).join(name),
    )
    .unwrap();

    let session = manual_session(target.path());
    let view = session.get_visible().unwrap();
    assert_eq!(texts(&view), vec!["a", "b", "c"]);
    assert_eq!(session.snapshots().last_position(), 0);
}

#[test]
fn test_latest_respects_max_position() {
    let dir = tempdir().unwrap();
    let session = manual_session(dir.path());
    append_texts(&session, &["a", "b"]);
    session.snapshot().unwrap();
    append_texts(&session, &["c"]);
    session.snapshot().unwrap();

    let manager = session.snapshots();
    assert_eq!(manager.latest(&session.reader(), 2).unwrap().position, 2);
    assert_eq!(manager.latest(&session.reader(), 3).unwrap().position, 3);
    assert_eq!(manager.latest(&session.reader(), 1).unwrap().position, 0);
}

#[test]
fn test_snapshot_at_zero_is_not_written() {
    let dir = tempdir().unwrap();
    let session = manual_session(dir.path());
    assert_eq!(session.snapshot().unwrap(), 0);
    assert!(session.snapshots().list().unwrap().is_empty());
}

#[test]
fn test_snapshot_beyond_log_end_is_skipped() {
    let dir = tempdir().unwrap();
    {
        let session = manual_session(dir.path());
        append_texts(&session, &["a", "b", "c"]);
        session.snapshot().unwrap();
    }
    // Same snapshot, but a fresh log that is shorter.
    fs::remove_file(dir.path().join("audit.jsonl")).unwrap();
    {
        let mut writer = EventWriter::open(dir.path()).unwrap();
        writer.append(msg("only")).unwrap();
    }

    let session = manual_session(dir.path());
    let view = session.get_visible().unwrap();
    assert_eq!(texts(&view), vec!["only"]);
}
