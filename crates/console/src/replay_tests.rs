// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;
use crate::terminal::Terminal;

fn replay_str(term: &Terminal) -> String {
    let (bytes, _) = generate(term, "connected", 1);
    String::from_utf8(bytes.to_vec()).expect("replay bytes must be valid utf-8 in these tests")
}

#[test]
fn empty_screen_replays_to_home_and_clear_only() {
    let term = Terminal::new();
    let out = replay_str(&term);
    assert_eq!(out, "\x1b[H\x1b[2J\x1b[1;1H\x1b[?1l");
}

#[test]
fn plain_text_replay_includes_home_clear_text_and_cursor() {
    let mut term = Terminal::new();
    term.feed(b"hello");
    let out = replay_str(&term);
    assert!(out.starts_with("\x1b[H\x1b[2Jhello"));
    assert!(out.contains("\x1b[1;6H"));
    assert!(out.ends_with("\x1b[?1l"));
}

#[test]
fn sgr_replay_reproduces_attribute_changes() {
    let mut term = Terminal::new();
    term.feed(b"\x1b[1;31mred\x1b[0mplain");
    let out = replay_str(&term);
    // bold+red-fg codes appear before "red", then a reset before "plain".
    assert!(out.contains("1;31mred") || out.contains("31;1mred"));
    assert!(out.contains("\x1b[0mplain"));
}

#[test]
fn trailing_blank_rows_are_not_emitted() {
    let mut term = Terminal::new();
    term.feed(b"only line one");
    let out = replay_str(&term);
    // A single content row produces no row separators at all.
    assert!(!out.contains("\r\n"));
}

#[test]
fn rows_are_separated_by_crlf_and_trailing_blanks_are_dropped() {
    // Scenario S1: "hello\r\nworld" replays as "hello\r\nworld" ending with
    // the cursor positioned right after "world" (row 2, col 6).
    let mut term = Terminal::new();
    term.feed(b"hello\r\nworld");
    let out = replay_str(&term);
    assert!(out.starts_with("\x1b[H\x1b[2Jhello\r\nworld"));
    assert!(out.ends_with("\x1b[2;6H\x1b[?1l"));
}

#[test]
fn trailing_blank_columns_within_a_row_are_trimmed() {
    let mut term = Terminal::new();
    term.feed(b"ab");
    let (bytes, _) = generate(&term, "connected", 1);
    // "ab" plus the clear/home/cursor escapes only: no run of 98 spaces.
    assert!(!bytes.windows(10).any(|w| w.iter().all(|&b| b == b' ')));
}

#[test]
fn replay_restores_shift_in_and_app_mode() {
    let mut term = Terminal::new();
    term.feed(b"\x1b)0\x1b[?1h");
    let out = replay_str(&term);
    assert!(out.ends_with("\x1b)0\x1b[?1h"));
}

#[test]
fn replay_emits_app_mode_off_escape_when_not_latched() {
    let mut term = Terminal::new();
    term.feed(b"plain");
    let out = replay_str(&term);
    assert!(!out.contains("?1h"));
    assert!(out.ends_with("\x1b[?1l"));
}

#[test]
fn status_record_carries_connectstate_and_client_count() {
    let term = Terminal::new();
    let (_, status) = generate(&term, "connecting", 3);
    assert_eq!(status.connectstate, "connecting");
    assert_eq!(status.client_count, 3);
}

#[test]
fn cursor_position_reflects_terminal_cursor_after_content() {
    let mut term = Terminal::new();
    term.feed(b"\x1b[5;10Hx");
    let out = replay_str(&term);
    assert!(out.contains("\x1b[5;11H"));
}
