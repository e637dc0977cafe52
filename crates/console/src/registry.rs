// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry & lifecycle (C7, §4.7): the process-wide `(node, tenant) →
//! handler` map, and the node-collection reaction that keeps it in sync
//! with the configuration store.
//!
//! Grounded on the teacher crate's `PodRegistry`/`SessionEntry` map
//! (`state.rs`): a `RwLock<HashMap<...>>` held only across the lookup
//! itself, never across an `.await` that touches handler internals (§5
//! "Shared mutable state").

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::backend::ConsolePlugin;
use crate::collective::Collective;
use crate::config::{ConfigStore, NodeCollectionEvent, ATTR_COLLECTIVE_MANAGER};
use crate::error::ConsoleError;
use crate::event_log::LogSink;
use crate::handler::{AttachOutcome, ConsoleHandler, HandlerDeps};
use crate::proxy::ProxyConsole;
use crate::replay::ReplayStatus;
use crate::session::{BoxFuture, ConsoleSession, NodeResolver, SessionId, Sink};

/// A resolved handler: either this process's own multiplexer (C4) or a
/// fresh relay to whichever collective member actually owns the node
/// (C6). Sessions are generic over this instead of over `ConsoleHandler`
/// directly, so attach/detach/write/etc. read identically regardless of
/// which side of the federation boundary the node currently sits on
/// (§4.6 — "presents the same operations as C4").
#[derive(Clone)]
pub enum Handle {
    Local(ConsoleHandler),
    Proxy(Arc<ProxyConsole>),
}

impl Handle {
    pub async fn attach(&self, session_id: SessionId, username: impl Into<String>, sink: Sink, skip_replay: bool) -> AttachOutcome {
        let mut outcome = match self {
            Handle::Local(h) => h.attach(session_id, username, sink).await,
            Handle::Proxy(p) => p.attach(session_id, username, sink, skip_replay).await,
        };
        if skip_replay {
            outcome.replay_bytes = Bytes::new();
        }
        outcome
    }

    pub async fn detach(&self, session_id: SessionId) {
        match self {
            Handle::Local(h) => h.detach(session_id).await,
            Handle::Proxy(p) => p.detach().await,
        }
    }

    pub async fn write(&self, data: Bytes) {
        match self {
            Handle::Local(h) => h.write(data).await,
            Handle::Proxy(p) => p.write(data).await,
        }
    }

    pub async fn send_break(&self) {
        match self {
            Handle::Local(h) => h.send_break().await,
            Handle::Proxy(p) => p.send_break().await,
        }
    }

    pub async fn reopen(&self) {
        match self {
            Handle::Local(h) => h.reopen().await,
            Handle::Proxy(p) => p.reopen().await,
        }
    }

    pub async fn get_recent(&self) -> (Bytes, ReplayStatus) {
        match self {
            Handle::Local(h) => h.get_recent().await,
            Handle::Proxy(p) => p.get_recent().await,
        }
    }

    pub async fn get_buffer_age(&self) -> Option<std::time::Duration> {
        match self {
            Handle::Local(h) => h.get_buffer_age().await,
            Handle::Proxy(_) => None,
        }
    }
}

struct RegistryInner {
    handlers: RwLock<HashMap<String, ConsoleHandler>>,
}

/// The process-wide `(node, tenant) → handler` map (§4.7). One `Registry`
/// is created per tenant at service startup (the tenant is implicit in
/// which `ConfigStore` it was built from) and threaded explicitly through
/// whatever transport layer accepts client sessions — never reached
/// through an implicit global (§9 Design Notes "Global registry").
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
    config: Arc<dyn ConfigStore>,
    collective: Arc<dyn Collective>,
    plugin: Arc<dyn ConsolePlugin>,
    log_sink: Arc<dyn LogSink>,
    cluster_size: usize,
}

impl Registry {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        collective: Arc<dyn Collective>,
        plugin: Arc<dyn ConsolePlugin>,
        log_sink: Arc<dyn LogSink>,
        cluster_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner { handlers: RwLock::new(HashMap::new()) }),
            config,
            collective,
            plugin,
            log_sink,
            cluster_size,
        }
    }

    /// §4.7 `connect_node`: resolve whichever handler currently owns
    /// `node` — the cached local `ConsoleHandler`, creating it on first
    /// use, or a fresh (uncached) `ProxyConsole` when `collective.manager`
    /// names a peer.
    pub async fn connect_node(&self, node: &str) -> Result<Handle, ConsoleError> {
        let attrs = self.config.get_node_attributes(&[node.to_owned()], &[ATTR_COLLECTIVE_MANAGER.to_owned()]);
        let manager = attrs.get(node).and_then(|a| a.get(ATTR_COLLECTIVE_MANAGER).cloned()).unwrap_or_default();
        let myname = self.collective.get_myname();

        if !manager.is_empty() && manager != myname {
            let member = self.collective.get_collective_member(&manager).ok_or(ConsoleError::Misconfigured)?;
            return Ok(Handle::Proxy(Arc::new(ProxyConsole::new(member, node, self.config.tenant(), myname))));
        }

        {
            let handlers = self.inner.handlers.read().await;
            if let Some(handler) = handlers.get(node) {
                return Ok(Handle::Local(handler.clone()));
            }
        }

        let mut handlers = self.inner.handlers.write().await;
        if let Some(handler) = handlers.get(node) {
            return Ok(Handle::Local(handler.clone()));
        }
        let deps = HandlerDeps {
            config: self.config.clone(),
            collective: self.collective.clone(),
            plugin: self.plugin.clone(),
            log_sink: self.log_sink.clone(),
            cluster_size: self.cluster_size,
        };
        let handler = ConsoleHandler::spawn(node, deps);
        handlers.insert(node.to_owned(), handler.clone());
        Ok(Handle::Local(handler))
    }

    /// §4.7 `disconnect_node`: close and evict the cached handler, if any.
    /// A no-op for nodes currently served by a (uncached) proxy.
    pub async fn disconnect_node(&self, node: &str) {
        let handler = { self.inner.handlers.write().await.remove(node) };
        if let Some(handler) = handler {
            handler.close().await;
        }
    }

    /// Validate `node`, resolve its current handler, and attach a new
    /// session to it — the single entry point a transport layer needs
    /// (§4.5 "construction validates that node exists").
    pub async fn open_session(
        &self,
        node: &str,
        username: impl Into<String>,
        sink: Sink,
        skip_replay: bool,
    ) -> Result<(Arc<ConsoleSession>, Bytes, ReplayStatus), ConsoleError> {
        if !self.config.is_node(node) {
            return Err(ConsoleError::Misconfigured);
        }
        let handle = self.connect_node(node).await?;
        let resolver: Arc<dyn NodeResolver> = Arc::new(self.clone());
        Ok(ConsoleSession::attach(node, username, handle, resolver, sink, skip_replay).await)
    }

    /// §4.7 `start_console_sessions`: eagerly connect every node this
    /// process owns, then keep the map in sync with node add/remove
    /// events from the configuration store for as long as the returned
    /// task runs.
    pub fn start_console_sessions(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            for node in registry.config.list_nodes() {
                let _ = registry.connect_node(&node).await;
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            registry.config.watch_nodecollection(tx);
            while let Some(event) = rx.recv().await {
                match event {
                    NodeCollectionEvent::Added(node) => {
                        info!(node = %node, "node added, connecting console");
                        let _ = registry.connect_node(&node).await;
                    }
                    NodeCollectionEvent::Removed(node) => {
                        info!(node = %node, "node removed, disconnecting console");
                        registry.disconnect_node(&node).await;
                    }
                }
            }
        });
    }
}

impl NodeResolver for Registry {
    fn resolve(&self, node: &str) -> BoxFuture<'_, Option<Handle>> {
        let node = node.to_owned();
        Box::pin(async move { self.connect_node(&node).await.ok() })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
