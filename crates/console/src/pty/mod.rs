// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reference backend plugin (A5): a native PTY-backed [`ConsolePlugin`]
//! implementation, exercising the plugin contract (§6) end to end.
//!
//! `console.method = "pty"` selects this plugin; the node attribute
//! `pty.command` names the program to spawn (space-split, no shell
//! quoting), defaulting to `/bin/sh` when absent.

pub mod nbio;
pub mod spawn;

pub use spawn::PtyConsolePlugin;
