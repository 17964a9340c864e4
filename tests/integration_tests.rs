//! Integration tests for keyspace-walker
//!
//! Every test runs against the in-process store, standalone or
//! partitioned, through the same registry and data-source API the CLI uses.

use keyspace_walker::config::{BrowseSettings, DataSourceDescriptor};
use keyspace_walker::datasource::{DataSource, DeletionEvent, MemoryVendor, Registry};
use keyspace_walker::delivery::{ActionStatus, Delivery, Record};
use keyspace_walker::error::{BrowserError, StoreError};
use keyspace_walker::store::{CommandReply, MemoryStore, MemoryValue, StreamEntry};
use keyspace_walker::tree::{EntryPointNode, LevelWindow};
use std::collections::HashSet;
use std::sync::Arc;

const GROUPS: [&str; 4] = ["group-atom", "group-atic", "group-artic", "group-bolton"];

fn fixture(store: &MemoryStore) {
    for group in GROUPS {
        for i in 1..=200 {
            store.set_text(format!("{group}:{i}"), "value");
        }
    }
}

fn open(store: &MemoryStore, settings: BrowseSettings, read_only: bool) -> Arc<DataSource> {
    let registry = Registry::new(settings);
    registry.register_vendor(MemoryVendor::with_store(store.clone()));
    let id = registry
        .create_data_source(&DataSourceDescriptor {
            id: "fixture".into(),
            vendor: "memory".into(),
            name: "fixture".into(),
            bootstrap: "memory://standalone".into(),
            read_only,
            ..Default::default()
        })
        .unwrap();
    registry.get(&id).unwrap()
}

/// Small pages and a tiny queue so any real listing streams
fn streaming() -> BrowseSettings {
    BrowseSettings {
        page_size: 10,
        channel_capacity: 2,
        validate_ownership: false,
    }
}

fn nodes(delivery: Delivery) -> Vec<EntryPointNode> {
    delivery
        .into_records()
        .into_iter()
        .map(|record| match record {
            Record::Node(node) => node,
            other => panic!("unexpected record {other:?}"),
        })
        .collect()
}

#[test]
fn test_two_levels_inline_and_streamed() {
    let store = MemoryStore::standalone();
    fixture(&store);

    let inline = open(&store, BrowseSettings::default(), false)
        .list_entry_points("*", LevelWindow::new(0, 1))
        .unwrap();
    assert_eq!(inline.delivery.status(), ActionStatus::Completed);
    let inline = nodes(inline.delivery);

    let streamed = open(&store, streaming(), false)
        .list_entry_points("*", LevelWindow::new(0, 1))
        .unwrap();
    assert_eq!(streamed.delivery.status(), ActionStatus::Moved);
    let streamed = nodes(streamed.delivery);

    assert_eq!(inline.len(), 804);
    assert_eq!(inline, streamed);

    let roots: Vec<_> = inline.iter().filter(|n| !n.path.contains(':')).collect();
    assert_eq!(roots.len(), 4);
    assert!(roots.iter().all(|n| n.child_count == 200 && !n.has_content));
    assert!(inline
        .iter()
        .filter(|n| n.path.contains(':'))
        .all(|n| n.has_content && n.child_count == 0));
}

#[test]
fn test_top_level_only() {
    let store = MemoryStore::standalone();
    fixture(&store);

    for settings in [BrowseSettings::default(), streaming()] {
        let listing = open(&store, settings, false)
            .list_entry_points("*", LevelWindow::new(0, 0))
            .unwrap();
        let nodes = nodes(listing.delivery);
        assert_eq!(nodes.len(), 4);
        assert!(nodes.iter().all(|n| n.has_content && n.child_count == 0));
    }
}

#[test]
fn test_glob_and_regex() {
    let store = MemoryStore::standalone();
    fixture(&store);
    let source = open(&store, BrowseSettings::default(), false);

    let all = source
        .list_entry_points("group-*", LevelWindow::ALL)
        .unwrap();
    assert_eq!(all.nodes, 804);

    let bolt = source
        .list_entry_points("group-*,.*bolt.*", LevelWindow::ALL)
        .unwrap();
    assert_eq!(bolt.nodes, 201);
    assert_eq!(bolt.stats.keys_excluded, 600);
    assert!(nodes(bolt.delivery)
        .iter()
        .all(|n| n.path.starts_with("group-bolton")));
}

#[test]
fn test_partitioned_matches_standalone() {
    let single = MemoryStore::standalone();
    fixture(&single);
    let cluster = MemoryStore::partitioned(3, 2);
    fixture(&cluster);

    let expected = nodes(
        open(&single, BrowseSettings::default(), false)
            .list_entry_points("*", LevelWindow::new(0, 1))
            .unwrap()
            .delivery,
    );

    let listing = open(&cluster, streaming(), false)
        .list_entry_points("*", LevelWindow::new(0, 1))
        .unwrap();
    assert_eq!(listing.stats.keys_scanned, 800);
    assert_eq!(listing.stats.shards_scanned, 3);
    assert_eq!(nodes(listing.delivery), expected);
}

#[test]
fn test_window_below_root() {
    let store = MemoryStore::standalone();
    store.set_text("app:users:1:name", "a");
    store.set_text("app:users:2:name", "b");
    store.set_text("app:orders:1", "c");

    let listing = open(&store, BrowseSettings::default(), false)
        .list_entry_points("app:*", LevelWindow::new(1, 2))
        .unwrap();
    let nodes = nodes(listing.delivery);
    let paths: Vec<_> = nodes.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(paths, vec!["orders", "orders:1", "users", "users:1", "users:2"]);
    assert_eq!(nodes[2].child_count, 2);
}

#[test]
fn test_delete_entry_point_boundary() {
    let store = MemoryStore::standalone();
    fixture(&store);
    let source = open(&store, BrowseSettings::default(), false);

    assert_eq!(
        source.delete_entry_point("group-atom:7").unwrap(),
        ActionStatus::Completed
    );
    assert_eq!(store.key_count(), 799);

    let listing = source
        .list_entry_points("*", LevelWindow::new(0, 1))
        .unwrap();
    let nodes = nodes(listing.delivery);
    let count = |path: &str| {
        nodes
            .iter()
            .find(|n| n.path == path)
            .map(|n| n.child_count)
            .unwrap()
    };
    assert_eq!(count("group-atom"), 199);
    assert_eq!(count("group-atic"), 200);
    assert_eq!(count("group-bolton"), 200);
}

#[test]
fn test_delete_children_keeps_prefix_value() {
    let store = MemoryStore::partitioned(4, 1);
    fixture(&store);
    store.set_text("group-atom", "root value");

    let source = open(&store, BrowseSettings::default(), false);
    let handle = source.delete_entry_point_children("group-atom").unwrap();
    assert_eq!(handle.status(), ActionStatus::Moved);

    let (last, failures) = handle.wait().unwrap();
    assert!(failures.is_empty());
    match last {
        DeletionEvent::Finished(report) => {
            assert_eq!(report.requested, 200);
            assert_eq!(report.deleted, 200);
        }
        other => panic!("unexpected final event {other:?}"),
    }

    assert!(store.contains("group-atom"));
    assert!(store.contains("group-atic:1"));
    assert_eq!(store.key_count(), 601);
}

#[test]
fn test_read_only_rejects_before_any_store_call() {
    let store = MemoryStore::partitioned(2, 0);
    fixture(&store);
    let source = open(&store, BrowseSettings::default(), true);
    let before = store.operation_count();

    let err = source.delete_entry_point("group-atom:1").unwrap_err();
    assert!(matches!(err, BrowserError::ReadOnlyViolation { ref source_id } if source_id == "fixture"));
    assert!(source
        .delete_entry_point_children("group-atom")
        .unwrap_err()
        .is_read_only_violation());

    assert_eq!(store.operation_count(), before);
    assert_eq!(store.key_count(), 800);
}

#[test]
fn test_unreachable_store() {
    let store = MemoryStore::standalone();
    fixture(&store);
    let source = open(&store, BrowseSettings::default(), false);
    store.set_reachable(false);

    let err = source
        .list_entry_points("*", LevelWindow::ALL)
        .unwrap_err();
    assert!(err.is_connectivity());
    assert!(source.entry_point_infos("group-atom:1").is_err());
}

#[test]
fn test_shard_failure_is_returned_synchronously() {
    let store = MemoryStore::partitioned(3, 0);
    fixture(&store);
    store.fail_scans(2, true);

    let err = open(&store, streaming(), false)
        .list_entry_points("*", LevelWindow::ALL)
        .unwrap_err();
    assert!(matches!(err, BrowserError::Store(StoreError::ScanFailed { .. })));
}

#[test]
fn test_hash_tags_stay_whole() {
    let store = MemoryStore::partitioned(3, 0);
    store.set_text("session:{eu:1}:token", "a");
    store.set_text("session:{eu:1}:user", "b");
    store.set_text("session:{us:2}:token", "c");

    let listing = open(&store, BrowseSettings::default(), false)
        .list_entry_points("*", LevelWindow::new(1, 2))
        .unwrap();
    let nodes = nodes(listing.delivery);
    assert_eq!(nodes.len(), 5);
    let roots: HashSet<_> = nodes
        .into_iter()
        .filter(|n| n.child_count > 0)
        .map(|n| (n.path, n.child_count))
        .collect();
    assert_eq!(
        roots,
        HashSet::from([("{eu:1}".to_string(), 2), ("{us:2}".to_string(), 1)])
    );
}

#[test]
fn test_content_and_infos_on_cluster() {
    let store = MemoryStore::partitioned(3, 1);
    store.insert(
        "leaderboard",
        MemoryValue::scored([("carol", 3.0), ("alice", 1.0), ("bob", 3.0)]),
    );
    let source = open(&store, BrowseSettings::default(), false);

    let infos = source.entry_point_infos("leaderboard").unwrap();
    assert_eq!(infos.length, 3);

    let batch = source.content("leaderboard", "*").unwrap();
    let json = serde_json::to_value(&batch).unwrap();
    assert_eq!(json["size"], 2);
    assert_eq!(json["data"][0]["score"], 1.0);
    assert_eq!(json["data"][1]["values"], serde_json::json!(["bob", "carol"]));
}

#[test]
fn test_stream_content_on_cluster() {
    let store = MemoryStore::partitioned(3, 0);
    store.insert(
        "audit:{eu}",
        MemoryValue::stream([
            StreamEntry::new("1700000000000-0", [("user", "alice")]),
            StreamEntry::new("1700000000000-1", [("user", "bob")]),
            StreamEntry::new("1700000000500-0", [("user", "carol")]),
        ]),
    );
    let source = open(&store, BrowseSettings::default(), false);

    let batch = source.content("audit:{eu}", "*,-0$").unwrap();
    let json = serde_json::to_value(&batch).unwrap();
    assert_eq!(json["size"], 2);
    assert_eq!(json["data"][1]["values"]["user"], "carol");
}

#[test]
fn test_exec_on_read_only_source() {
    let store = MemoryStore::partitioned(2, 0);
    fixture(&store);
    let source = open(&store, BrowseSettings::default(), true);
    let line = |text: &str| -> Vec<String> { text.split(' ').map(String::from).collect() };

    let reply = source.execute_command(&line("GET group-atom:7"), None).unwrap();
    assert_eq!(reply, CommandReply::Text("value".into()));

    let before = store.operation_count();
    assert!(source
        .execute_command(&line("DEL group-atom:7"), None)
        .unwrap_err()
        .is_read_only_violation());
    assert_eq!(store.operation_count(), before);
    assert!(store.contains("group-atom:7"));

    let total: i64 = ["primary-0", "primary-1"]
        .into_iter()
        .map(|node| match source.execute_command(&line("DBSIZE"), Some(node)).unwrap() {
            CommandReply::Integer(n) => n,
            other => panic!("unexpected reply {other:?}"),
        })
        .sum();
    assert_eq!(total, 800);
}

#[test]
fn test_status_counts_keys_per_node() {
    let store = MemoryStore::partitioned(2, 1);
    fixture(&store);
    let state = open(&store, BrowseSettings::default(), false).status().unwrap();

    assert_eq!(state.node_states.len(), 4);
    assert_eq!(
        state.sections[0].get("cluster_known_nodes"),
        Some(&serde_json::json!(4))
    );
    let keyed = state
        .node_states
        .iter()
        .filter(|n| n.section("Keyspace").is_some_and(|s| s.get("db0").is_some()))
        .count();
    assert!(keyed >= 2);
}
