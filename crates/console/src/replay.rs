// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replay generation (C3, §4.3): render a [`Terminal`]'s current buffer back
//! into an ANSI byte stream for a client that has just attached.
//!
//! Operates on `Vec<u8>`/[`Bytes`] end to end — there is no intermediate
//! `String` stage, since the buffer may legitimately contain CP437
//! fallback characters from [`crate::normalize::Utf8CpDecoder`] and forcing
//! everything through `String` would buy nothing but an extra allocation.

use bytes::Bytes;
use serde::Serialize;

use crate::terminal::{Attrs, Cell, Color, Terminal};

/// The control record sent alongside replay bytes when a client attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayStatus {
    pub connectstate: String,
    pub client_count: usize,
}

fn is_blank_row(row: &[Cell]) -> bool {
    row.iter().all(|c| c.ch == ' ' && c.attrs == Attrs::default())
}

fn sgr_diff(buf: &mut Vec<u8>, prev: Attrs, next: Attrs) {
    if prev == next {
        return;
    }
    let mut codes: Vec<u32> = Vec::new();
    if next == Attrs::default() {
        codes.push(0);
    } else {
        if prev.bold && !next.bold {
            codes.push(22);
        }
        if !prev.bold && next.bold {
            codes.push(1);
        }
        if prev.italic && !next.italic {
            codes.push(23);
        }
        if !prev.italic && next.italic {
            codes.push(3);
        }
        if prev.underline && !next.underline {
            codes.push(24);
        }
        if !prev.underline && next.underline {
            codes.push(4);
        }
        if prev.reverse && !next.reverse {
            codes.push(27);
        }
        if !prev.reverse && next.reverse {
            codes.push(7);
        }
        if prev.strike && !next.strike {
            codes.push(29);
        }
        if !prev.strike && next.strike {
            codes.push(9);
        }
        if prev.fg != next.fg {
            codes.push(match next.fg {
                Color::Default => 39,
                Color::Indexed(n) => 30 + n as u32,
            });
        }
        if prev.bg != next.bg {
            codes.push(match next.bg {
                Color::Default => 49,
                Color::Indexed(n) => 40 + n as u32,
            });
        }
    }
    if codes.is_empty() {
        return;
    }
    buf.extend_from_slice(b"\x1b[");
    for (i, code) in codes.iter().enumerate() {
        if i > 0 {
            buf.push(b';');
        }
        buf.extend_from_slice(code.to_string().as_bytes());
    }
    buf.push(b'm');
}

fn trailing_blank_cols(row: &[Cell]) -> usize {
    row.iter().rev().take_while(|c| c.ch == ' ' && c.attrs == Attrs::default()).count()
}

fn write_row(buf: &mut Vec<u8>, row: &[Cell], current: &mut Attrs) {
    let printable_len = row.len() - trailing_blank_cols(row);
    for cell in &row[..printable_len] {
        sgr_diff(buf, *current, cell.attrs);
        *current = cell.attrs;
        let mut char_buf = [0u8; 4];
        buf.extend_from_slice(cell.ch.encode_utf8(&mut char_buf).as_bytes());
    }
}

/// Render `term`'s current buffer into replay bytes plus its status record.
pub fn generate(term: &Terminal, connectstate: impl Into<String>, client_count: usize) -> (Bytes, ReplayStatus) {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"\x1b[H\x1b[2J");

    let grid = term.grid();
    let last = grid.iter().rposition(|row| !is_blank_row(row));

    // Rows up to and including `last` are emitted with `\r\n` between them
    // (blank rows contribute an empty line, "held" until a later non-blank
    // row makes them real); anything past `last` is trailing blank and
    // dropped entirely, per step 3.
    if let Some(last) = last {
        let mut current = Attrs::default();
        for (idx, row) in grid.iter().enumerate().take(last + 1) {
            if idx > 0 {
                buf.extend_from_slice(b"\r\n");
            }
            write_row(&mut buf, row, &mut current);
        }
        if current != Attrs::default() {
            buf.extend_from_slice(b"\x1b[0m");
        }
    }

    let (x, y) = term.cursor();
    buf.extend_from_slice(format!("\x1b[{};{}H", y + 1, x + 1).as_bytes());

    if let Some(charset) = term.shift_in() {
        buf.extend_from_slice(b"\x1b)");
        buf.push(charset);
    }

    if term.app_mode() {
        buf.extend_from_slice(b"\x1b[?1h");
    } else {
        buf.extend_from_slice(b"\x1b[?1l");
    }

    (Bytes::from(buf), ReplayStatus { connectstate: connectstate.into(), client_count })
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
