// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The configuration-store contract (§6) — an external collaborator.
//!
//! The real store lives outside this crate (it owns node inventory and
//! tenant attribute persistence); [`ConfigStore`] is the seam the core
//! needs. [`StaticConfigStore`] is a minimal in-memory reference
//! implementation used by the demo binary and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Attribute key controlling whether/how a node's console stream is logged.
pub const ATTR_CONSOLE_LOGGING: &str = "console.logging";
/// Attribute key naming the collective member that owns a node.
pub const ATTR_COLLECTIVE_MANAGER: &str = "collective.manager";
/// Attribute key selecting which backend plugin handles a node's console.
pub const ATTR_CONSOLE_METHOD: &str = "console.method";

/// A single node's attribute map: attribute name -> current value.
pub type NodeAttributes = HashMap<String, String>;

/// Opaque handle returned by `watch_attributes`/`watch_nodecollection`,
/// passed back to `remove_watcher` to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(u64);

/// An attribute-change notification for one node.
#[derive(Debug, Clone)]
pub struct AttributeChange {
    pub node: String,
    pub changed_keys: Vec<String>,
    pub attributes: NodeAttributes,
}

/// A node-collection membership change.
#[derive(Debug, Clone)]
pub enum NodeCollectionEvent {
    Added(String),
    Removed(String),
}

/// The configuration store contract consumed by the core (§6).
///
/// Watches are expressed as channels rather than closures: callers hand a
/// sender, the store pushes notifications until `remove_watcher` is called.
pub trait ConfigStore: Send + Sync + 'static {
    fn get_node_attributes(&self, nodes: &[String], keys: &[String]) -> HashMap<String, NodeAttributes>;

    fn watch_attributes(
        &self,
        nodes: &[String],
        keys: &[String],
        sink: mpsc::UnboundedSender<AttributeChange>,
    ) -> WatchToken;

    fn remove_watcher(&self, token: WatchToken);

    fn is_node(&self, name: &str) -> bool;

    fn list_nodes(&self) -> Vec<String>;

    fn watch_nodecollection(&self, sink: mpsc::UnboundedSender<NodeCollectionEvent>) -> WatchToken;

    fn tenant(&self) -> &str;
}

/// How a node's console stream is persisted, derived from `console.logging`.
///
/// Per §4.4: `{full, "", buffer}` -> always-on with logging; `{none, memory}`
/// -> on-demand with no logging; any other value -> on-demand with logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingPolicy {
    pub is_ondemand: bool,
    pub do_logging: bool,
}

impl LoggingPolicy {
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value.unwrap_or("") {
            "full" | "" | "buffer" => Self { is_ondemand: false, do_logging: true },
            "none" | "memory" => Self { is_ondemand: true, do_logging: false },
            _ => Self { is_ondemand: true, do_logging: true },
        }
    }
}

/// Minimal in-memory [`ConfigStore`] for the demo binary and tests.
///
/// Watches are accepted but never fire on their own; call
/// [`StaticConfigStore::set_attribute`] / [`StaticConfigStore::add_node`] /
/// [`StaticConfigStore::remove_node`] to drive notifications explicitly,
/// matching how a unit test simulates the real store's push events.
pub struct StaticConfigStore {
    tenant: String,
    inner: Mutex<Inner>,
    next_token: AtomicU64,
}

struct Inner {
    nodes: HashMap<String, NodeAttributes>,
    attribute_watchers: HashMap<u64, (Vec<String>, Vec<String>, mpsc::UnboundedSender<AttributeChange>)>,
    collection_watchers: HashMap<u64, mpsc::UnboundedSender<NodeCollectionEvent>>,
}

impl StaticConfigStore {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                attribute_watchers: HashMap::new(),
                collection_watchers: HashMap::new(),
            }),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn add_node(&self, node: impl Into<String>, attrs: NodeAttributes) {
        let node = node.into();
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.nodes.insert(node.clone(), attrs);
        }
        self.notify_collection(NodeCollectionEvent::Added(node));
    }

    pub fn remove_node(&self, node: &str) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.nodes.remove(node);
        }
        self.notify_collection(NodeCollectionEvent::Removed(node.to_owned()));
    }

    /// Set a single attribute on a node and notify any matching watchers.
    pub fn set_attribute(&self, node: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let (attrs, watchers) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let entry = inner.nodes.entry(node.to_owned()).or_default();
            entry.insert(key.to_owned(), value);
            let attrs = entry.clone();
            let watchers: Vec<mpsc::UnboundedSender<AttributeChange>> = inner
                .attribute_watchers
                .values()
                .filter(|(nodes, keys, _)| {
                    (nodes.is_empty() || nodes.iter().any(|n| n == node))
                        && (keys.is_empty() || keys.iter().any(|k| k == key))
                })
                .map(|(_, _, tx)| tx.clone())
                .collect();
            (attrs, watchers)
        };
        let change = AttributeChange {
            node: node.to_owned(),
            changed_keys: vec![key.to_owned()],
            attributes: attrs,
        };
        for tx in watchers {
            let _ = tx.send(change.clone());
        }
    }

    fn notify_collection(&self, event: NodeCollectionEvent) {
        let watchers: Vec<mpsc::UnboundedSender<NodeCollectionEvent>> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.collection_watchers.values().cloned().collect()
        };
        for tx in watchers {
            let _ = tx.send(clone_event(&event));
        }
    }
}

fn clone_event(event: &NodeCollectionEvent) -> NodeCollectionEvent {
    match event {
        NodeCollectionEvent::Added(n) => NodeCollectionEvent::Added(n.clone()),
        NodeCollectionEvent::Removed(n) => NodeCollectionEvent::Removed(n.clone()),
    }
}

impl ConfigStore for StaticConfigStore {
    fn get_node_attributes(&self, nodes: &[String], keys: &[String]) -> HashMap<String, NodeAttributes> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        nodes
            .iter()
            .filter_map(|n| inner.nodes.get(n).map(|attrs| (n.clone(), attrs.clone())))
            .map(|(n, attrs)| {
                if keys.is_empty() {
                    (n, attrs)
                } else {
                    let filtered =
                        attrs.into_iter().filter(|(k, _)| keys.iter().any(|want| want == k)).collect();
                    (n, filtered)
                }
            })
            .collect()
    }

    fn watch_attributes(
        &self,
        nodes: &[String],
        keys: &[String],
        sink: mpsc::UnboundedSender<AttributeChange>,
    ) -> WatchToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.attribute_watchers.insert(token, (nodes.to_vec(), keys.to_vec(), sink));
        WatchToken(token)
    }

    fn remove_watcher(&self, token: WatchToken) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.attribute_watchers.remove(&token.0);
        inner.collection_watchers.remove(&token.0);
    }

    fn is_node(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.nodes.contains_key(name)
    }

    fn list_nodes(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.nodes.keys().cloned().collect()
    }

    fn watch_nodecollection(&self, sink: mpsc::UnboundedSender<NodeCollectionEvent>) -> WatchToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.collection_watchers.insert(token, sink);
        WatchToken(token)
    }

    fn tenant(&self) -> &str {
        &self.tenant
    }
}

/// Convenience wrapper so `Arc<StaticConfigStore>` satisfies `ConfigStore`
/// trait objects the same way a shared handle to the real store would.
pub fn shared(store: StaticConfigStore) -> Arc<dyn ConfigStore> {
    Arc::new(store)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
