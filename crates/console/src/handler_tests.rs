// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::collective::StaticCollective;
use crate::config::{shared, StaticConfigStore, ATTR_CONSOLE_LOGGING};
use crate::event_log::NullLogSink;
use crate::session::PollQueue;
use crate::test_support::{MockPlugin, MockState};

fn deps(config: Arc<dyn ConfigStore>, plugin: Arc<dyn ConsolePlugin>) -> HandlerDeps {
    HandlerDeps {
        config,
        collective: Arc::new(StaticCollective::new("mgr-a")),
        plugin,
        log_sink: Arc::new(NullLogSink),
        cluster_size: 3,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn poll_sink() -> (Sink, Arc<PollQueue>) {
    let queue = PollQueue::new();
    (Sink::Poll(queue.clone()), queue)
}

#[tokio::test]
async fn close_is_idempotent() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let handler = ConsoleHandler::spawn("node1", deps(shared(store), Arc::new(MockPlugin::new(state))));

    handler.close().await;
    handler.close().await;
    handler.close().await;
}

#[tokio::test]
async fn always_on_node_connects_without_a_subscriber() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let handler = ConsoleHandler::spawn("node1", deps(shared(store), Arc::new(MockPlugin::new(state.clone()))));

    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;
    handler.close().await;
}

#[tokio::test]
async fn ondemand_node_connects_on_attach_and_disconnects_on_last_detach() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::from([(ATTR_CONSOLE_LOGGING.to_owned(), "none".to_owned())]));
    let state = MockState::new();
    let handler = ConsoleHandler::spawn("node1", deps(shared(store), Arc::new(MockPlugin::new(state.clone()))));

    assert_eq!(state.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let (sink, _queue) = poll_sink();
    let session_id = SessionId::next();
    let outcome = handler.attach(session_id, "alice", sink).await;
    assert_eq!(outcome.status.connectstate, "unconnected");
    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;

    handler.detach(session_id).await;
    handler.close().await;
}

#[tokio::test]
async fn misconfigured_backend_does_not_retry() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let plugin = MockPlugin::new(state.clone());
    plugin.unconfigured.store(true, std::sync::atomic::Ordering::SeqCst);
    let handler = ConsoleHandler::spawn("node1", deps(shared(store), Arc::new(plugin)));

    let (sink, _queue) = poll_sink();
    let outcome = handler.attach(SessionId::next(), "alice", sink).await;
    assert_eq!(outcome.status.connectstate, "unconnected");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    handler.close().await;
}

#[tokio::test]
async fn retryable_failure_reconnects_with_backoff() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    state.fail_connect.store(true, std::sync::atomic::Ordering::SeqCst);
    let handler = ConsoleHandler::spawn("node1", deps(shared(store), Arc::new(MockPlugin::new(state.clone()))));

    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;
    handler.close().await;
}

#[tokio::test]
async fn attach_delivers_replay_before_live_bytes() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());
    let state = MockState::new();
    let handler = ConsoleHandler::spawn("node1", deps(shared(store), Arc::new(MockPlugin::new(state.clone()))));

    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;
    state.push_bytes(b"hello\r\n");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (sink, queue) = poll_sink();
    let outcome = handler.attach(SessionId::next(), "alice", sink).await;
    assert!(!outcome.replay_bytes.is_empty());

    state.push_bytes(b"more");
    let events = queue.poll(Duration::from_millis(200)).await.unwrap();
    assert!(!events.is_empty());
    handler.close().await;
}

#[tokio::test]
async fn manager_change_to_a_peer_clears_subscribers() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());
    let store = Arc::new(store);
    let state = MockState::new();
    let handler = ConsoleHandler::spawn(
        "node1",
        HandlerDeps {
            config: store.clone() as Arc<dyn ConfigStore>,
            collective: Arc::new(StaticCollective::new("mgr-a")),
            plugin: Arc::new(MockPlugin::new(state.clone())),
            log_sink: Arc::new(NullLogSink),
            cluster_size: 3,
        },
    );

    let (sink, queue) = poll_sink();
    handler.attach(SessionId::next(), "alice", sink).await;

    store.set_attribute("node1", crate::config::ATTR_COLLECTIVE_MANAGER, "mgr-b");

    let events = queue.poll(Duration::from_millis(200)).await.unwrap();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Rehome)));
    handler.close().await;
}

#[tokio::test]
async fn logging_only_attribute_change_does_not_reconnect_an_already_connected_backend() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());
    let store = Arc::new(store);
    let state = MockState::new();
    let handler = ConsoleHandler::spawn(
        "node1",
        HandlerDeps {
            config: store.clone() as Arc<dyn ConfigStore>,
            collective: Arc::new(StaticCollective::new("mgr-a")),
            plugin: Arc::new(MockPlugin::new(state.clone())),
            log_sink: Arc::new(NullLogSink),
            cluster_size: 3,
        },
    );

    wait_until(|| state.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1).await;
    store.set_attribute("node1", ATTR_CONSOLE_LOGGING, "full");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.connect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    handler.close().await;
}
