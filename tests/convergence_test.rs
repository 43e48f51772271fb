/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests that peers which write concurrently to the same object end up in the same state.
//!
//! Every peer is a [Node] that writes to its own feed in a shared [MemoryFeedStore], and reads the
//! feeds of every other peer from it. Concurrent writes are staged by pausing the pipelines of every
//! peer, so that no peer sees the other's write before making its own.

use std::time::Duration;

use causal_pipeline::{
    feeds::memory::MemoryFeedStore,
    model::{
        list_model::{ListModel, ListMutation},
        object_model::{ObjectModel, ObjectMutation},
    },
    pipeline::timeframe_clock::WaitOutcome,
};
use log::LevelFilter;

mod common;

use crate::common::{keys::sorted_feed_keys, logging::setup_logger, node::Node};

#[test]
fn concurrent_writes_converge_to_the_higher_feed_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start two peers. `nodes[1]` has the higher feed key.
    let store = MemoryFeedStore::new();
    let feed_keys = sorted_feed_keys(2);
    let nodes: Vec<Node> = feed_keys
        .iter()
        .map(|feed_key| Node::new(&store, *feed_key, &feed_keys, None))
        .collect();

    // 2. Create an object on the lower peer, and wait for it to reach the higher peer.
    let object_id = nodes[0].create_object().object_id();
    for node in nodes.iter() {
        assert_eq!(node.wait_until_caught_up(), WaitOutcome::Reached);
    }
    assert_eq!(nodes[1].field(&object_id, "title"), None);

    // 3. Set the same field on both peers while neither processes anything.
    log::debug!("Writing concurrently to both peers.");
    nodes.iter().for_each(|node| node.replica().pause().unwrap());
    let lower_write = nodes[0]
        .object(&object_id)
        .write_mutation::<ObjectModel>(&ObjectMutation::set("title", "Braneframe"))
        .unwrap();
    let higher_write = nodes[1]
        .object(&object_id)
        .write_mutation::<ObjectModel>(&ObjectMutation::set("title", "DXOS"))
        .unwrap();

    // Optimistic writes are visible locally right away.
    assert_eq!(nodes[0].field(&object_id, "title"), Some("Braneframe".to_string()));
    assert_eq!(nodes[1].field(&object_id, "title"), Some("DXOS".to_string()));
    assert_eq!(nodes[0].object(&object_id).pending_mutations(), 1);

    // 4. Let both peers catch up.
    nodes.iter().for_each(|node| node.replica().unpause().unwrap());
    for node in nodes.iter() {
        assert_eq!(node.wait_until_caught_up(), WaitOutcome::Reached);
    }
    assert!(lower_write.wait_to_be_processed_timeout(Duration::from_secs(10)));
    assert!(higher_write.wait_to_be_processed_timeout(Duration::from_secs(10)));

    // 5. The write from the higher feed is ordered last on both peers, so it wins everywhere.
    for node in nodes.iter() {
        log::debug!("Checking the state of {}.", node.name());
        assert_eq!(node.field(&object_id, "title"), Some("DXOS".to_string()));
        assert_eq!(node.object(&object_id).pending_mutations(), 0);
    }
    let mutations: Vec<_> = nodes
        .iter()
        .map(|node| node.object(&object_id).mutations())
        .collect();
    assert_eq!(mutations[0], mutations[1]);
    assert_eq!(mutations[0].len(), 2);
    assert_eq!(mutations[0][1].meta.feed_key, nodes[1].feed_key());

    let digests: Vec<_> = nodes
        .iter()
        .map(|node| node.object(&object_id).state_digest().unwrap())
        .collect();
    assert!(digests[0].is_some());
    assert_eq!(digests[0], digests[1]);
}

#[test]
fn optimistic_writes_are_reconciled_with_remote_writes_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start three peers, and create a list on the first one.
    let store = MemoryFeedStore::new();
    let feed_keys = sorted_feed_keys(3);
    let nodes: Vec<Node> = feed_keys
        .iter()
        .map(|feed_key| Node::new(&store, *feed_key, &feed_keys, None))
        .collect();

    let object_id = nodes[0].create_list().object_id();
    for node in nodes.iter() {
        assert_eq!(node.wait_until_caught_up(), WaitOutcome::Reached);
    }

    // 2. Push two values on every peer, concurrently.
    nodes.iter().for_each(|node| node.replica().pause().unwrap());
    for (i, node) in nodes.iter().enumerate() {
        let list = node.object(&object_id);
        for j in 0..2 {
            list.write_mutation::<ListModel>(&ListMutation::push(format!("{}-{}", i, j)))
                .unwrap();
        }
        assert_eq!(
            node.list_values(&object_id),
            vec![format!("{}-0", i), format!("{}-1", i)]
        );
    }

    // 3. Let every peer catch up. Every peer ends up with the same list.
    nodes.iter().for_each(|node| node.replica().unpause().unwrap());
    for node in nodes.iter() {
        assert_eq!(node.wait_until_caught_up(), WaitOutcome::Reached);
    }

    let expected = nodes[0].list_values(&object_id);
    assert_eq!(expected.len(), 6);
    for node in nodes.iter() {
        assert_eq!(node.list_values(&object_id), expected);
        assert_eq!(node.object(&object_id).pending_mutations(), 0);
    }

    // Writes from the same peer keep their relative order.
    for i in 0..3 {
        let first = expected.iter().position(|value| *value == format!("{}-0", i));
        let second = expected.iter().position(|value| *value == format!("{}-1", i));
        assert!(first < second);
    }
}
