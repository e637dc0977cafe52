// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native PTY backend (A5): `forkpty`-spawned child process wired up to
//! the [`BackendConsole`]/[`ConsolePlugin`] contract (§6).

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{execvp, ForkResult, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::nbio::{read_chunk, set_nonblocking, write_all, PtyFd};
use crate::backend::{BackendConsole, BackendEvent, BoxFuture, ConsolePlugin};
use crate::config::NodeAttributes;
use crate::error::PluginError;

/// Attribute key naming the command a PTY backend spawns. Space-split,
/// no shell quoting; defaults to `/bin/sh` when absent.
pub const ATTR_PTY_COMMAND: &str = "pty.command";

const DEFAULT_COMMAND: &str = "/bin/sh";

/// Wraps a live `forkpty`'d child process.
struct NativePty {
    master: AsyncFd<PtyFd>,
    child_pid: Pid,
}

impl NativePty {
    /// `command` must have at least one element (the program to run).
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    fn spawn(command: &[String], cols: u16, rows: u16) -> anyhow::Result<Self> {
        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }?;
        let ForkptyResult { master, fork_result } = result;

        match fork_result {
            ForkResult::Child => {
                std::env::set_var("TERM", "xterm-256color");

                let c_args: Vec<CString> = command
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<Result<_, _>>()
                    .unwrap_or_default();
                if c_args.is_empty() {
                    std::process::exit(127);
                }
                let _ = execvp(&c_args[0], &c_args);
                std::process::exit(127);
            }
            ForkResult::Parent { child } => {
                set_nonblocking(&master)?;
                let afd = AsyncFd::new(PtyFd(master))?;
                Ok(Self { master: afd, child_pid: child })
            }
        }
    }

    fn terminate(&self) {
        let _ = kill(self.child_pid, Signal::SIGHUP);
        let _ = kill(self.child_pid, Signal::SIGKILL);
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }

}

impl Drop for NativePty {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// One live PTY-backed console session (§6 `BackendConsole`).
pub struct PtyBackendConsole {
    node: String,
    pty: Arc<NativePty>,
    closed: Arc<AtomicBool>,
}

impl BackendConsole for PtyBackendConsole {
    fn connect(&mut self, events: mpsc::Sender<BackendEvent>) -> BoxFuture<'_, Result<(), PluginError>> {
        let pty = self.pty.clone();
        let node = self.node.clone();
        Box::pin(async move {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    match read_chunk(&pty.master, &mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if events.send(BackendEvent::Bytes(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                                break;
                            }
                        }
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(err) => {
                            tracing::warn!(node = %node, error = %err, "pty read failed");
                            break;
                        }
                    }
                }
                let _ = events.send(BackendEvent::Disconnected).await;
            });
            Ok(())
        })
    }

    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<(), PluginError>> {
        let pty = self.pty.clone();
        Box::pin(async move {
            write_all(&pty.master, &data).await.map_err(|e| PluginError::Other(e.to_string()))
        })
    }

    fn send_break(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        // A PTY has no physical break signal; not meaningful for this
        // reference backend.
        Box::pin(async { Err(PluginError::NotImplemented) })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        let pty = self.pty.clone();
        let closed = self.closed.clone();
        Box::pin(async move {
            // Idempotent: terminate() itself is safe to call more than once,
            // but only the first caller needs to.
            if !closed.swap(true, Ordering::SeqCst) {
                pty.terminate();
            }
            Ok(())
        })
    }

    fn config_attributes(&self) -> &[&str] {
        &[ATTR_PTY_COMMAND]
    }
}

/// Instantiates [`PtyBackendConsole`]s via `forkpty` (§6 `ConsolePlugin`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyConsolePlugin {
    cols: u16,
    rows: u16,
}

impl PtyConsolePlugin {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl ConsolePlugin for PtyConsolePlugin {
    fn create(&self, node: &str, attrs: &NodeAttributes) -> Result<Box<dyn BackendConsole>, PluginError> {
        let command = attrs.get(ATTR_PTY_COMMAND).map(String::as_str).unwrap_or(DEFAULT_COMMAND);
        let argv: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
        if argv.is_empty() {
            return Err(PluginError::NotFound);
        }
        let cols = if self.cols == 0 { 100 } else { self.cols };
        let rows = if self.rows == 0 { 31 } else { self.rows };
        let pty = NativePty::spawn(&argv, cols, rows).map_err(|e| PluginError::Other(e.to_string()))?;
        Ok(Box::new(PtyBackendConsole {
            node: node.to_owned(),
            pty: Arc::new(pty),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

