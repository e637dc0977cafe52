// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::collective::{CollectiveMember, StaticCollective};
use crate::config::StaticConfigStore;
use crate::event_log::NullLogSink;
use crate::session::Sink;
use crate::test_support::{MockPlugin, MockState};

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn poll_sink() -> Sink {
    Sink::Poll(crate::session::PollQueue::new())
}

#[tokio::test]
async fn connect_node_creates_and_caches_a_local_handler() {
    let store = Arc::new(StaticConfigStore::new("default"));
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let reg = Registry::new(
        store.clone() as Arc<dyn ConfigStore>,
        Arc::new(StaticCollective::new("mgr-a")),
        Arc::new(MockPlugin::new(state.clone())),
        Arc::new(NullLogSink),
        1,
    );

    let first = reg.connect_node("node1").await.expect("resolves");
    let second = reg.connect_node("node1").await.expect("resolves");
    assert!(matches!(first, Handle::Local(_)));
    assert!(matches!(second, Handle::Local(_)));
    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;
    // At-most-one backend (§8 property 4): two resolutions of the same
    // node share the one cached handler, so exactly one connect happened.
    assert_eq!(state.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_node_returns_a_proxy_when_a_peer_owns_the_node() {
    let store = Arc::new(StaticConfigStore::new("default"));
    store.add_node(
        "node1",
        HashMap::from([(ATTR_COLLECTIVE_MANAGER.to_owned(), "mgr-b".to_owned())]),
    );
    let state = MockState::new();
    let collective =
        StaticCollective::new("mgr-a").with_member("mgr-b", CollectiveMember { address: "10.0.0.2:13001".to_owned(), fingerprint: vec![9] });
    let reg = Registry::new(
        store as Arc<dyn ConfigStore>,
        Arc::new(collective),
        Arc::new(MockPlugin::new(state.clone())),
        Arc::new(NullLogSink),
        1,
    );

    let handle = reg.connect_node("node1").await.expect("resolves");
    assert!(matches!(handle, Handle::Proxy(_)));
    assert_eq!(state.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connect_node_fails_when_the_named_peer_is_unknown() {
    let store = Arc::new(StaticConfigStore::new("default"));
    store.add_node(
        "node1",
        HashMap::from([(ATTR_COLLECTIVE_MANAGER.to_owned(), "mgr-ghost".to_owned())]),
    );
    let state = MockState::new();
    let reg = Registry::new(
        store as Arc<dyn ConfigStore>,
        Arc::new(StaticCollective::new("mgr-a")),
        Arc::new(MockPlugin::new(state)),
        Arc::new(NullLogSink),
        1,
    );

    let result = reg.connect_node("node1").await;
    assert!(matches!(result, Err(ConsoleError::Misconfigured)));
}

#[tokio::test]
async fn disconnect_node_closes_and_evicts_the_cached_handler() {
    let store = Arc::new(StaticConfigStore::new("default"));
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let reg = Registry::new(
        store as Arc<dyn ConfigStore>,
        Arc::new(StaticCollective::new("mgr-a")),
        Arc::new(MockPlugin::new(state.clone())),
        Arc::new(NullLogSink),
        1,
    );

    reg.connect_node("node1").await.expect("resolves");
    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;
    reg.disconnect_node("node1").await;
    wait_until(|| state.closes.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;

    // A fresh connect_node after eviction must spawn a brand-new handler
    // (and therefore a second connect), not reuse the closed one.
    reg.connect_node("node1").await.expect("resolves again");
    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 2).await;
}

#[tokio::test]
async fn open_session_rejects_an_unknown_node() {
    let store = Arc::new(StaticConfigStore::new("default"));
    let state = MockState::new();
    let reg = Registry::new(
        store as Arc<dyn ConfigStore>,
        Arc::new(StaticCollective::new("mgr-a")),
        Arc::new(MockPlugin::new(state)),
        Arc::new(NullLogSink),
        1,
    );

    let result = reg.open_session("ghost", "alice", poll_sink(), false).await;
    assert!(matches!(result, Err(ConsoleError::Misconfigured)));
}

#[tokio::test]
async fn open_session_attaches_a_session_to_a_known_node() {
    let store = Arc::new(StaticConfigStore::new("default"));
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let reg = Registry::new(
        store as Arc<dyn ConfigStore>,
        Arc::new(StaticCollective::new("mgr-a")),
        Arc::new(MockPlugin::new(state)),
        Arc::new(NullLogSink),
        1,
    );

    let (session, _replay, status) =
        reg.open_session("node1", "alice", poll_sink(), false).await.expect("session opens");
    assert!(!status.connectstate.is_empty());
    session.detach().await;
}

#[tokio::test]
async fn start_console_sessions_connects_existing_nodes_and_reacts_to_collection_events() {
    let store = Arc::new(StaticConfigStore::new("default"));
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let reg = Arc::new(Registry::new(
        store.clone() as Arc<dyn ConfigStore>,
        Arc::new(StaticCollective::new("mgr-a")),
        Arc::new(MockPlugin::new(state.clone())),
        Arc::new(NullLogSink),
        1,
    ));

    reg.start_console_sessions();
    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;

    store.add_node("node2", HashMap::new());
    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 2).await;

    store.remove_node("node1");
    wait_until(|| state.closes.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;
}
