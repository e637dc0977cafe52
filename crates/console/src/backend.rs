// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The backend plugin contract (§6) — an external collaborator.
//!
//! A plugin instantiates one [`BackendConsole`] per node via
//! [`ConsolePlugin::create`], resolved through the opaque path
//! `/nodes/<node>/_console/session`. The handler then calls `connect`,
//! which starts delivery of [`BackendEvent`]s on the supplied channel —
//! mirroring the reference crate's callback-driven backend `run` loops
//! (`pty::Backend::run`), adapted here from a borrowed-channel-pair
//! signature to an owned-sender handed to the plugin, since the plugin
//! (not the handler) owns the read loop's lifetime.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::PluginError;

/// A byte delivery or the disconnect sentinel from a backend (§4.4).
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Bytes(Bytes),
    Disconnected,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One live backend console session for a single node.
///
/// Object-safe so handlers can hold `Box<dyn BackendConsole>` regardless
/// of which plugin created it.
pub trait BackendConsole: Send {
    /// Start delivery. Bytes and the `Disconnected` sentinel arrive on
    /// `events`; the handler hands off processing to its actor loop
    /// immediately rather than blocking this future on fan-out work.
    fn connect(&mut self, events: mpsc::Sender<BackendEvent>) -> BoxFuture<'_, Result<(), PluginError>>;

    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<(), PluginError>>;

    fn send_break(&self) -> BoxFuture<'_, Result<(), PluginError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), PluginError>>;

    /// Optional keepalive. Plugins that don't support it report `NotImplemented`.
    fn ping(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(async { Err(PluginError::NotImplemented) })
    }

    /// Extra attribute keys this backend wants the handler to watch,
    /// beyond `{console.method, console.logging, collective.manager}`.
    fn config_attributes(&self) -> &[&str] {
        &[]
    }
}

/// A plugin that instantiates backend consoles for nodes (§6).
pub trait ConsolePlugin: Send + Sync + 'static {
    /// Resolve `/nodes/<node>/_console/session` with operation `create`.
    ///
    /// Returns `PluginError::NotImplemented`/`NotFound` when the plugin has
    /// no console method configured for this node; the handler treats
    /// either as `misconfigured` and does not retry.
    fn create(
        &self,
        node: &str,
        attrs: &crate::config::NodeAttributes,
    ) -> Result<Box<dyn BackendConsole>, PluginError>;
}
