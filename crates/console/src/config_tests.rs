// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;

#[yare::parameterized(
    full = { Some("full"), false, true },
    empty = { Some(""), false, true },
    absent = { None, false, true },
    buffer = { Some("buffer"), false, true },
    none = { Some("none"), true, false },
    memory = { Some("memory"), true, false },
    interactive = { Some("interactive"), true, true },
)]
fn logging_policy_from_attribute(value: Option<&str>, ondemand: bool, logging: bool) {
    let policy = LoggingPolicy::from_attribute(value);
    assert_eq!(policy.is_ondemand, ondemand);
    assert_eq!(policy.do_logging, logging);
}

#[test]
fn static_store_reports_nodes_and_attributes() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::from([(ATTR_CONSOLE_LOGGING.to_owned(), "full".to_owned())]));

    assert!(store.is_node("node1"));
    assert!(!store.is_node("node2"));
    assert_eq!(store.list_nodes(), vec!["node1".to_owned()]);
    assert_eq!(store.tenant(), "default");

    let attrs = store.get_node_attributes(
        &["node1".to_owned()],
        &[ATTR_CONSOLE_LOGGING.to_owned()],
    );
    assert_eq!(attrs["node1"][ATTR_CONSOLE_LOGGING], "full");
}

#[tokio::test]
async fn watch_attributes_fires_on_matching_change() {
    let store = StaticConfigStore::new("default");
    store.add_node("node1", HashMap::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let token = store.watch_attributes(
        &["node1".to_owned()],
        &[ATTR_COLLECTIVE_MANAGER.to_owned()],
        tx,
    );

    store.set_attribute("node1", ATTR_CONSOLE_LOGGING, "none");
    assert!(rx.try_recv().is_err(), "unrelated attribute change must not fire");

    store.set_attribute("node1", ATTR_COLLECTIVE_MANAGER, "peer-b");
    let change = rx.try_recv().expect("matching change should fire");
    assert_eq!(change.node, "node1");
    assert_eq!(change.attributes[ATTR_COLLECTIVE_MANAGER], "peer-b");

    store.remove_watcher(token);
    store.set_attribute("node1", ATTR_COLLECTIVE_MANAGER, "peer-c");
    assert!(rx.try_recv().is_err(), "removed watcher must not fire again");
}

#[tokio::test]
async fn watch_nodecollection_reports_add_and_remove() {
    let store = StaticConfigStore::new("default");
    let (tx, mut rx) = mpsc::unbounded_channel();
    store.watch_nodecollection(tx);

    store.add_node("node1", HashMap::new());
    match rx.try_recv() {
        Ok(NodeCollectionEvent::Added(name)) => assert_eq!(name, "node1"),
        other => panic!("unexpected event: {other:?}"),
    }

    store.remove_node("node1");
    match rx.try_recv() {
        Ok(NodeCollectionEvent::Removed(name)) => assert_eq!(name, "node1"),
        other => panic!("unexpected event: {other:?}"),
    }
}
