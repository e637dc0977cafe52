// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles. Not part of the public API — `#[cfg(test)]` only.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::backend::{BackendConsole, BackendEvent, ConsolePlugin};
use crate::config::NodeAttributes;
use crate::error::PluginError;
use crate::handler::BoxFuture;

/// Shared, inspectable state behind a [`MockBackend`]/[`MockPlugin`] pair.
/// Tests hold an `Arc<MockState>` alongside the handler under test and use
/// it to push backend bytes, simulate a disconnect, or assert on what the
/// handler wrote back.
pub struct MockState {
    pub connect_calls: AtomicUsize,
    pub writes: StdMutex<Vec<Bytes>>,
    pub breaks: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_connect: AtomicBool,
    events_tx: StdMutex<Option<mpsc::Sender<BackendEvent>>>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connect_calls: AtomicUsize::new(0),
            writes: StdMutex::new(Vec::new()),
            breaks: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            events_tx: StdMutex::new(None),
        })
    }

    /// Deliver bytes as if the backend had just produced them. No-op if no
    /// connect has completed yet.
    pub fn push_bytes(&self, data: &[u8]) {
        if let Some(tx) = self.events_tx.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.try_send(BackendEvent::Bytes(Bytes::copy_from_slice(data)));
        }
    }

    /// Simulate the backend dropping the connection.
    pub fn disconnect(&self) {
        if let Some(tx) = self.events_tx.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.try_send(BackendEvent::Disconnected);
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct MockBackend {
    state: Arc<MockState>,
}

impl BackendConsole for MockBackend {
    fn connect(&mut self, events: mpsc::Sender<BackendEvent>) -> BoxFuture<'_, Result<(), PluginError>> {
        let state = self.state.clone();
        Box::pin(async move {
            state.connect_calls.fetch_add(1, Ordering::SeqCst);
            if state.fail_connect.load(Ordering::SeqCst) {
                return Err(PluginError::TargetEndpointUnreachable);
            }
            *state.events_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(events);
            Ok(())
        })
    }

    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<(), PluginError>> {
        self.state.writes.lock().unwrap_or_else(|e| e.into_inner()).push(data);
        Box::pin(async { Ok(()) })
    }

    fn send_break(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        self.state.breaks.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// A [`ConsolePlugin`] that always hands out [`MockBackend`]s wired to the
/// same shared [`MockState`], or reports itself unconfigured when asked.
pub struct MockPlugin {
    state: Arc<MockState>,
    pub unconfigured: AtomicBool,
}

impl MockPlugin {
    pub fn new(state: Arc<MockState>) -> Self {
        Self { state, unconfigured: AtomicBool::new(false) }
    }
}

impl ConsolePlugin for MockPlugin {
    fn create(&self, _node: &str, _attrs: &NodeAttributes) -> Result<Box<dyn BackendConsole>, PluginError> {
        if self.unconfigured.load(Ordering::SeqCst) {
            return Err(PluginError::NotImplemented);
        }
        Ok(Box::new(MockBackend { state: self.state.clone() }))
    }
}
