// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log sinks (A4): where a [`ConsoleHandler`](crate::handler::ConsoleHandler)
//! sends byte-chunk and transition records (§6 Log Records).
//!
//! [`LogSink`] is the seam; [`FileLogSink`] is a JSONL-per-node reference
//! implementation (grounded on the reference crate's file-backed event
//! log), and [`NullLogSink`] is used for on-demand nodes where
//! `console.logging` disables persistence entirely.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The four transition events a handler reports (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEvent {
    ConsoleConnect,
    ConsoleDisconnect,
    ClientConnect,
    ClientDisconnect,
}

impl TransitionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsoleConnect => "consoleconnect",
            Self::ConsoleDisconnect => "consoledisconnect",
            Self::ClientConnect => "clientconnect",
            Self::ClientDisconnect => "clientdisconnect",
        }
    }
}

/// Pack the two mode-latch bits a byte-chunk record carries: bit 0 is
/// `app_mode`, bit 1 is whether `shift_in` is latched (§6).
pub fn eventdata_bits(app_mode: bool, shift_in: Option<u8>) -> u8 {
    (app_mode as u8) | ((shift_in.is_some() as u8) << 1)
}

/// Where a handler sends its byte-chunk and transition records.
pub trait LogSink: Send + Sync + 'static {
    /// A normalized chunk of console output for `node`.
    fn log_chunk(&self, node: &str, text: &str, eventdata: u8);

    /// A connect/disconnect transition for `node`, with an optional
    /// client username and the current subscriber multiplicity.
    fn log_transition(&self, node: &str, event: TransitionEvent, username: Option<&str>, multiplicity: u32);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogRecord {
    Chunk { node: String, text: String, eventdata: u8, timestamp_ms: u64 },
    Transition {
        node: String,
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        multiplicity: u32,
        timestamp_ms: u64,
    },
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Discards everything. Used for nodes whose `console.logging` attribute
/// selects on-demand (no persistent buffer).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log_chunk(&self, _node: &str, _text: &str, _eventdata: u8) {}
    fn log_transition(&self, _node: &str, _event: TransitionEvent, _username: Option<&str>, _multiplicity: u32) {}
}

/// Appends JSONL records to `<dir>/<node>.jsonl`, one file per node.
///
/// Best-effort: a write failure is logged via `tracing` and otherwise
/// swallowed, matching the reference crate's file-backed event log (a
/// stalled disk must not take down console relaying).
pub struct FileLogSink {
    dir: PathBuf,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = std::fs::create_dir_all(&dir);
        Self { dir }
    }

    fn append(&self, node: &str, record: &LogRecord) {
        let path = self.dir.join(format!("{node}.jsonl"));
        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(node, error = %err, "failed to serialize log record");
                return;
            }
        };
        line.push('\n');
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path);
        match file {
            Ok(mut file) => {
                if let Err(err) = file.write_all(line.as_bytes()) {
                    tracing::warn!(node, error = %err, "failed to append log record");
                }
            }
            Err(err) => tracing::warn!(node, error = %err, "failed to open log file"),
        }
    }
}

impl LogSink for FileLogSink {
    fn log_chunk(&self, node: &str, text: &str, eventdata: u8) {
        self.append(
            node,
            &LogRecord::Chunk { node: node.to_owned(), text: text.to_owned(), eventdata, timestamp_ms: now_ms() },
        );
    }

    fn log_transition(&self, node: &str, event: TransitionEvent, username: Option<&str>, multiplicity: u32) {
        self.append(
            node,
            &LogRecord::Transition {
                node: node.to_owned(),
                event: event.as_str().to_owned(),
                username: username.map(str::to_owned),
                multiplicity,
                timestamp_ms: now_ms(),
            },
        );
    }
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
