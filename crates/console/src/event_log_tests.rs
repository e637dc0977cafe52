// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;

fn read_lines(dir: &std::path::Path, node: &str) -> Vec<serde_json::Value> {
    let path = dir.join(format!("{node}.jsonl"));
    let text = std::fs::read_to_string(path).unwrap_or_default();
    text.lines().map(|line| serde_json::from_str(line).expect("valid json line")).collect()
}

#[test]
fn eventdata_bits_packs_app_mode_and_shift_in() {
    assert_eq!(eventdata_bits(false, None), 0);
    assert_eq!(eventdata_bits(true, None), 1);
    assert_eq!(eventdata_bits(false, Some(b'0')), 2);
    assert_eq!(eventdata_bits(true, Some(b'0')), 3);
}

#[test]
fn null_sink_discards_everything() {
    let sink = NullLogSink;
    sink.log_chunk("node1", "hello", 0);
    sink.log_transition("node1", TransitionEvent::ConsoleConnect, None, 1);
}

#[test]
fn file_sink_appends_chunk_records_per_node() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = FileLogSink::new(dir.path());

    sink.log_chunk("node1", "hello", 1);
    sink.log_chunk("node1", "world", 2);
    sink.log_chunk("node2", "other", 0);

    let node1 = read_lines(dir.path(), "node1");
    assert_eq!(node1.len(), 2);
    assert_eq!(node1[0]["kind"], "chunk");
    assert_eq!(node1[0]["text"], "hello");
    assert_eq!(node1[0]["eventdata"], 1);
    assert_eq!(node1[1]["text"], "world");

    let node2 = read_lines(dir.path(), "node2");
    assert_eq!(node2.len(), 1);
    assert_eq!(node2[0]["text"], "other");
}

#[test]
fn file_sink_appends_transition_records_with_username_and_multiplicity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = FileLogSink::new(dir.path());

    sink.log_transition("node1", TransitionEvent::ClientConnect, Some("alice"), 2);
    sink.log_transition("node1", TransitionEvent::ClientDisconnect, None, 0);

    let records = read_lines(dir.path(), "node1");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["kind"], "transition");
    assert_eq!(records[0]["event"], "clientconnect");
    assert_eq!(records[0]["username"], "alice");
    assert_eq!(records[0]["multiplicity"], 2);

    assert_eq!(records[1]["event"], "clientdisconnect");
    assert!(records[1].get("username").is_none());
}

#[test]
fn transition_event_as_str_matches_log_record_tags() {
    assert_eq!(TransitionEvent::ConsoleConnect.as_str(), "consoleconnect");
    assert_eq!(TransitionEvent::ConsoleDisconnect.as_str(), "consoledisconnect");
    assert_eq!(TransitionEvent::ClientConnect.as_str(), "clientconnect");
    assert_eq!(TransitionEvent::ClientDisconnect.as_str(), "clientdisconnect");
}

#[test]
fn file_sink_creates_directory_if_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("nested").join("logs");
    let sink = FileLogSink::new(&nested);
    sink.log_chunk("node1", "x", 0);
    assert!(nested.join("node1.jsonl").exists());
}
