mod common;

use common::{msg, msg_with, texts, RawLog};
use patchfold::{fold, fold_all, replay_state, Materialized, Patch};
use serde_json::json;

#[test]
fn test_plain_events_fold_in_order() {
    let mut log = RawLog::new();
    log.event(msg_with("a", "k", json!(1)));
    log.event(msg_with("b", "k", json!(2)));
    log.event(msg_with("c", "other", json!("x")));

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["a", "b", "c"]);
    assert_eq!(view.position, 3);
    assert_eq!(view.state["k"], 2);
    assert_eq!(view.state["other"], "x");
}

#[test]
fn test_splice_example() {
    let mut log = RawLog::new();
    for t in ["a", "b", "c", "d"] {
        log.text(t);
    }
    log.patch(Patch::splice(1, 2, vec![msg_with("e", "mood", json!("calm"))]));

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["a", "e", "d"]);
    assert_eq!(view.state["mood"], "calm");
    assert_eq!(view.position, 5);
}

#[test]
fn test_truncate_before_example() {
    let mut log = RawLog::new();
    let ids: Vec<u64> = ["a", "b", "c"].iter().map(|t| log.text(t)).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    log.patch(Patch::truncate_before(3));

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["c"]);
}

#[test]
fn test_dead_deltas_leave_state() {
    let mut log = RawLog::new();
    log.event(msg_with("a", "topic", json!("old")));
    log.event(msg_with("b", "count", json!(1)));
    let c = log.event(msg_with("c", "count", json!(2)));
    log.patch(Patch::truncate_before(c));

    let view = fold_all(log.entries.clone());
    assert_eq!(view.state.get("topic"), None);
    assert_eq!(view.state["count"], 2);
}

#[test]
fn test_summary_delta_replaces_summarized() {
    let mut log = RawLog::new();
    log.event(msg_with("a", "x", json!(1)));
    log.event(msg_with("b", "y", json!(2)));
    log.event(msg_with("c", "x", json!(3)));
    log.patch(Patch::summarize(
        0,
        2,
        msg("summary of a and b").with_delta("x", json!(10)).with_delta("z", json!(true)),
    ));

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["summary of a and b", "c"]);
    // summary first, then c: c's later write to x wins.
    assert_eq!(view.state["x"], 3);
    assert_eq!(view.state["z"], true);
    assert_eq!(view.state.get("y"), None);
}

#[test]
fn test_events_after_patch_append_to_end() {
    let mut log = RawLog::new();
    log.text("a");
    log.text("b");
    log.patch(Patch::splice(0, 1, vec![msg("r")]));
    log.text("c");

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["r", "b", "c"]);
}

#[test]
fn test_invalid_patch_is_skipped() {
    let mut log = RawLog::new();
    log.text("a");
    log.text("b");
    log.patch(Patch::splice(5, 1, vec![msg("never")]));
    log.patch(Patch::truncate_before(999));
    log.text("c");

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["a", "b", "c"]);
    assert_eq!(view.position, 5);
}

#[test]
fn test_unknown_patch_folds_as_noop() {
    let mut log = RawLog::new();
    log.text("a");
    log.patch(Patch::Unknown);
    log.text("b");

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["a", "b"]);
    assert_eq!(view.position, 3);
}

#[test]
fn test_later_patch_addresses_earlier_result() {
    let mut log = RawLog::new();
    for t in ["a", "b", "c", "d", "e"] {
        log.text(t);
    }
    // [a, b, c, d, e] -> [c, d, e] -> [c, X, e]
    log.patch(Patch::splice(0, 2, vec![]));
    log.patch(Patch::splice(1, 1, vec![msg("X")]));

    let view = fold_all(log.entries.clone());
    assert_eq!(texts(&view), vec!["c", "X", "e"]);
}

#[test]
fn test_patch_only_suffix_rebuilds_state() {
    let mut log = RawLog::new();
    log.event(msg_with("a", "k", json!("a")));
    log.event(msg_with("b", "k", json!("b")));
    let prefix = fold_all(log.entries.clone());
    assert_eq!(prefix.state["k"], "b");

    log.patch(Patch::splice(1, 1, vec![]));
    let view = fold(log.entries[2..].to_vec(), &prefix);
    assert_eq!(view.state["k"], "a");
    assert_eq!(view.state, replay_state(view.visible()));
}

#[test]
fn test_fold_is_idempotent() {
    let mut log = RawLog::new();
    log.event(msg_with("a", "k", json!(1)));
    log.text("b");
    log.patch(Patch::summarize(0, 2, msg_with("s", "k", json!(2))));
    log.text("c");

    let first = fold_all(log.entries.clone());
    let second = fold_all(log.entries.clone());
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_incremental_matches_single_pass() {
    let mut log = RawLog::new();
    for t in ["a", "b", "c"] {
        log.text(t);
    }
    log.patch(Patch::splice(1, 1, vec![msg("B")]));
    log.text("d");
    log.patch(Patch::truncate_before(3));
    log.text("e");

    let full = fold_all(log.entries.clone());
    for k in 0..=log.len() {
        let prefix = fold_all(log.entries[..k].to_vec());
        let resumed = fold(log.entries[k..].to_vec(), &prefix);
        assert_eq!(resumed, full, "split at {k}");
    }
}

#[test]
fn test_empty_suffix_returns_start() {
    let mut log = RawLog::new();
    log.text("a");
    let view = fold_all(log.entries.clone());
    assert_eq!(fold(Vec::new(), &view), view);
    assert_eq!(fold_all(Vec::new()), Materialized::empty());
}
