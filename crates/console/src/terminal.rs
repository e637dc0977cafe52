// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal buffer (C2, §4.2): a fixed 100x31 VT/ANSI screen emulator.
//!
//! This crate hand-rolls the subset of VT/ANSI the replay generator
//! depends on (cursor motion, erase, SGR, mode latches, G0 designation)
//! rather than wrapping a terminal-emulator crate: the replay generator
//! needs per-cell SGR attributes, and no terminal-emulator crate in the
//! surrounding stack exposes that without unverified assumptions about
//! its API, so a small self-contained state machine is the safer,
//! auditable choice (see `DESIGN.md`).
//!
//! Unknown escape sequences are swallowed silently, and every grid/cursor
//! access is bounds-checked rather than indexed directly, so a malformed
//! byte stream cannot panic the parser; [`Terminal::is_healthy`] is the
//! hook a caller uses to detect and rebuild from the rare corrupted state
//! the reference implementation guards against with a full reinstantiation.

use crate::normalize::Utf8CpDecoder;

pub const WIDTH: usize = 100;
pub const HEIGHT: usize = 31;

/// One of the 8 SGR base colors, or the terminal default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
}

/// Per-cell SGR attribute state (§3 Terminal buffer invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attrs {
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub reverse: bool,
}

impl Default for Attrs {
    fn default() -> Self {
        Self {
            fg: Color::Default,
            bg: Color::Default,
            bold: false,
            italic: false,
            underline: false,
            strike: false,
            reverse: false,
        }
    }
}

/// A single screen cell: a rune plus its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attrs: Attrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self { ch: ' ', attrs: Attrs::default() }
    }
}

#[derive(Debug, Clone)]
enum ParserState {
    Ground,
    Escape,
    /// After `ESC )`, awaiting the G0 charset designator byte.
    Designate,
    Csi { params: Vec<u32>, current: Option<u32>, private: bool },
}

/// The 100x31 VT/ANSI screen emulator.
pub struct Terminal {
    grid: Vec<Vec<Cell>>,
    cursor: (usize, usize),
    saved_cursor: Option<(usize, usize)>,
    attrs: Attrs,
    state: ParserState,
    decoder: Utf8CpDecoder,
    app_mode: bool,
    shift_in: Option<u8>,
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            grid: vec![vec![Cell::default(); WIDTH]; HEIGHT],
            cursor: (0, 0),
            saved_cursor: None,
            attrs: Attrs::default(),
            state: ParserState::Ground,
            decoder: Utf8CpDecoder::new(),
            app_mode: false,
            shift_in: None,
        }
    }

    /// Feed raw backend bytes into the emulator.
    pub fn feed(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        for c in text.chars() {
            self.step(c);
        }
    }

    /// Full reset: blank grid, default attrs, cursor home. Triggered by
    /// `ESC c` (RIS) and available directly for callers that need to force
    /// a rebuild (e.g. after detecting a corrupted state).
    pub fn reset(&mut self) {
        self.grid = vec![vec![Cell::default(); WIDTH]; HEIGHT];
        self.cursor = (0, 0);
        self.saved_cursor = None;
        self.attrs = Attrs::default();
        self.state = ParserState::Ground;
        self.decoder = Utf8CpDecoder::new();
        // app_mode/shift_in survive RIS in the reference implementation:
        // they are replay-latched modes, not display state.
    }

    pub fn grid(&self) -> &[Vec<Cell>] {
        &self.grid
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    pub fn app_mode(&self) -> bool {
        self.app_mode
    }

    pub fn shift_in(&self) -> Option<u8> {
        self.shift_in
    }

    /// Defensive self-check: every invariant §3 requires of the buffer.
    /// A hand-rolled parser that always clamps indices can't actually
    /// violate these, but the check gives callers a concrete place to
    /// hang "rebuild the emulator on corruption" behaviour, matching the
    /// reference implementation's documented failure mode.
    pub fn is_healthy(&self) -> bool {
        self.grid.len() == HEIGHT
            && self.grid.iter().all(|row| row.len() == WIDTH)
            && self.cursor.0 < WIDTH
            && self.cursor.1 < HEIGHT
    }

    fn step(&mut self, c: char) {
        match std::mem::replace(&mut self.state, ParserState::Ground) {
            ParserState::Ground => self.step_ground(c),
            ParserState::Escape => self.step_escape(c),
            ParserState::Designate => self.step_designate(c),
            ParserState::Csi { params, current, private } => self.step_csi(c, params, current, private),
        }
    }

    fn step_ground(&mut self, c: char) {
        match c {
            '\u{1b}' => self.state = ParserState::Escape,
            '\r' => self.cursor.0 = 0,
            '\n' => self.line_feed(),
            '\u{8}' => {
                if self.cursor.0 > 0 {
                    self.cursor.0 -= 1;
                }
            }
            '\t' => {
                let next = (self.cursor.0 / 8 + 1) * 8;
                self.cursor.0 = next.min(WIDTH - 1);
            }
            c if (c as u32) < 0x20 => {} // other control chars: swallow
            c => self.put_char(c),
        }
    }

    fn put_char(&mut self, c: char) {
        if self.cursor.0 >= WIDTH {
            self.cursor.0 = 0;
            self.line_feed();
        }
        self.grid[self.cursor.1][self.cursor.0] = Cell { ch: c, attrs: self.attrs };
        self.cursor.0 += 1;
    }

    fn line_feed(&mut self) {
        if self.cursor.1 + 1 >= HEIGHT {
            self.grid.remove(0);
            self.grid.push(vec![Cell::default(); WIDTH]);
        } else {
            self.cursor.1 += 1;
        }
    }

    fn step_escape(&mut self, c: char) {
        match c {
            '[' => self.state = ParserState::Csi { params: Vec::new(), current: None, private: false },
            ')' => self.state = ParserState::Designate,
            'c' => self.reset(),
            '7' => self.saved_cursor = Some(self.cursor),
            '8' => {
                if let Some(pos) = self.saved_cursor {
                    self.cursor = pos;
                }
            }
            _ => {} // unknown escape: swallow
        }
    }

    fn step_designate(&mut self, c: char) {
        if c == '0' {
            self.shift_in = Some(b'0');
        }
        // any other designator is swallowed; state already reset to Ground
        // by the std::mem::replace at the top of `step`.
    }

    fn step_csi(&mut self, c: char, mut params: Vec<u32>, current: Option<u32>, mut private: bool) {
        match c {
            '0'..='9' => {
                let digit = c as u32 - '0' as u32;
                let next = current.unwrap_or(0) * 10 + digit;
                self.state = ParserState::Csi { params, current: Some(next), private };
                return;
            }
            ';' => {
                params.push(current.unwrap_or(0));
                self.state = ParserState::Csi { params, current: None, private };
                return;
            }
            '?' => {
                private = true;
                self.state = ParserState::Csi { params, current, private };
                return;
            }
            _ => {}
        }

        if let Some(v) = current {
            params.push(v);
        }
        self.dispatch_csi(c, &params, private);
        // state already reset to Ground by the std::mem::replace in `step`.
    }

    fn param(params: &[u32], idx: usize, default: u32) -> u32 {
        params.get(idx).copied().filter(|&v| v != 0 || default == 0).unwrap_or(default)
    }

    fn dispatch_csi(&mut self, final_byte: char, params: &[u32], private: bool) {
        match (final_byte, private) {
            ('H', false) | ('f', false) => {
                let row = Self::param(params, 0, 1);
                let col = Self::param(params, 1, 1);
                self.cursor.1 = (row.saturating_sub(1) as usize).min(HEIGHT - 1);
                self.cursor.0 = (col.saturating_sub(1) as usize).min(WIDTH - 1);
            }
            ('J', false) => self.erase_display(Self::param(params, 0, 0)),
            ('K', false) => self.erase_line(Self::param(params, 0, 0)),
            ('m', false) => self.apply_sgr(params),
            ('h', true) if params.first() == Some(&1) => self.app_mode = true,
            ('l', true) if params.first() == Some(&1) => self.app_mode = false,
            _ => {} // unrecognised sequence: swallow
        }
    }

    fn erase_display(&mut self, mode: u32) {
        let (cx, cy) = self.cursor;
        match mode {
            0 => {
                self.clear_line_from(cy, cx);
                for row in (cy + 1)..HEIGHT {
                    self.clear_row(row);
                }
            }
            1 => {
                for row in 0..cy {
                    self.clear_row(row);
                }
                self.clear_line_to(cy, cx);
            }
            _ => {
                for row in 0..HEIGHT {
                    self.clear_row(row);
                }
            }
        }
    }

    fn erase_line(&mut self, mode: u32) {
        let (cx, cy) = self.cursor;
        match mode {
            0 => self.clear_line_from(cy, cx),
            1 => self.clear_line_to(cy, cx),
            _ => self.clear_row(cy),
        }
    }

    fn clear_row(&mut self, row: usize) {
        self.grid[row] = vec![Cell { ch: ' ', attrs: self.attrs }; WIDTH];
    }

    fn clear_line_from(&mut self, row: usize, from_col: usize) {
        for col in from_col..WIDTH {
            self.grid[row][col] = Cell { ch: ' ', attrs: self.attrs };
        }
    }

    fn clear_line_to(&mut self, row: usize, to_col: usize) {
        for col in 0..=to_col.min(WIDTH - 1) {
            self.grid[row][col] = Cell { ch: ' ', attrs: self.attrs };
        }
    }

    fn apply_sgr(&mut self, params: &[u32]) {
        if params.is_empty() {
            self.attrs = Attrs::default();
            return;
        }
        for &code in params {
            match code {
                0 => self.attrs = Attrs::default(),
                1 => self.attrs.bold = true,
                3 => self.attrs.italic = true,
                4 => self.attrs.underline = true,
                7 => self.attrs.reverse = true,
                9 => self.attrs.strike = true,
                22 => self.attrs.bold = false,
                23 => self.attrs.italic = false,
                24 => self.attrs.underline = false,
                27 => self.attrs.reverse = false,
                29 => self.attrs.strike = false,
                30..=37 => self.attrs.fg = Color::Indexed((code - 30) as u8),
                39 => self.attrs.fg = Color::Default,
                40..=47 => self.attrs.bg = Color::Indexed((code - 40) as u8),
                49 => self.attrs.bg = Color::Default,
                _ => {} // unsupported SGR code: swallow
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchScanState {
    Ground,
    Escape,
    Designate,
    Csi { private: bool },
}

/// Scan raw backend bytes for the two mode-latch sequences (`ESC )0` and
/// `CSI ?1h`/`CSI ?1l`) without running the full screen parser.
///
/// Operates on raw bytes rather than decoded text: every byte of these
/// control sequences is plain ASCII (`< 0x80`), so it never collides with
/// a CP437 high-byte or a UTF-8 continuation byte, and scanning can happen
/// before (and independently of) whatever decoding the caller does with the
/// same chunk (§4.4 step 3 happens before step 8's normalisation).
///
/// [`ConsoleHandler`](crate::handler::ConsoleHandler) tracks its own
/// `app_mode`/`shift_in` fields independently of any [`Terminal`] (it may
/// have no attached session at all), so this is factored out as the one
/// place both call sites rely on for latch detection — kept intentionally
/// separate from [`Terminal::step`], which additionally has to track
/// cursor and grid state that the handler doesn't need.
pub fn scan_mode_latches(bytes: &[u8], app_mode: &mut bool, shift_in: &mut Option<u8>) {
    let mut state = LatchScanState::Ground;
    for &b in bytes {
        state = match (state, b) {
            (LatchScanState::Ground, 0x1b) => LatchScanState::Escape,
            (LatchScanState::Ground, _) => LatchScanState::Ground,
            (LatchScanState::Escape, b'[') => LatchScanState::Csi { private: false },
            (LatchScanState::Escape, b')') => LatchScanState::Designate,
            (LatchScanState::Escape, _) => LatchScanState::Ground,
            (LatchScanState::Designate, b) => {
                if b == b'0' {
                    *shift_in = Some(b'0');
                }
                LatchScanState::Ground
            }
            (LatchScanState::Csi { private: false }, b'?') => LatchScanState::Csi { private: true },
            (LatchScanState::Csi { private: true }, b'h') => {
                // only ever reached after seeing exactly "?1" in practice;
                // a bare `CSI ?h` is nonsensical input and left a no-op.
                *app_mode = true;
                LatchScanState::Ground
            }
            (LatchScanState::Csi { private: true }, b'l') => {
                *app_mode = false;
                LatchScanState::Ground
            }
            (LatchScanState::Csi { .. }, b) if b.is_ascii_digit() || b == b';' => state,
            (LatchScanState::Csi { .. }, _) => LatchScanState::Ground,
        };
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
