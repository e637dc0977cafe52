// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-subscriber console multiplexer for cluster-managed nodes.
//!
//! Normalises a node's raw console byte stream into a VT-aware screen
//! buffer, fans it out to any number of attached subscribers, and keeps
//! at most one backend connection open per node regardless of how many
//! subscribers are attached. Nodes owned by a different collective
//! member are relayed over a TLS connection instead of backed by a
//! local connection.

pub mod backend;
pub mod collective;
pub mod config;
pub mod error;
pub mod event_log;
pub mod handler;
pub mod normalize;
pub mod proxy;
pub mod pty;
pub mod registry;
pub mod replay;
pub mod session;
pub mod terminal;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::backend::ConsolePlugin;
use crate::collective::Collective;
use crate::config::ConfigStore;
use crate::event_log::LogSink;
use crate::registry::Registry;

/// Process-wide configuration for [`run`]. Values come from whichever
/// cluster-management surface embeds this crate; the demo binary builds
/// one from static in-memory stores.
pub struct RuntimeConfig {
    pub config: Arc<dyn ConfigStore>,
    pub collective: Arc<dyn Collective>,
    pub plugin: Arc<dyn ConsolePlugin>,
    pub log_sink: Arc<dyn LogSink>,
    pub cluster_size: usize,
}

/// Build the registry and start reconciling it against the node
/// collection until the process shuts down. Returns the registry so the
/// caller's transport layer (a websocket server, a long-poll handler) can
/// open sessions against it.
pub fn run(runtime: RuntimeConfig) -> Arc<Registry> {
    let registry = Arc::new(Registry::new(
        runtime.config,
        runtime.collective,
        runtime.plugin,
        runtime.log_sink,
        runtime.cluster_size,
    ));
    registry.start_console_sessions();
    registry
}
