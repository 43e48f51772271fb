use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use causal_pipeline::{
    events::{CreateObjectEvent, ProcessMutationEvent, ResetStateMachineEvent},
    feeds::memory::{MemoryFeed, MemoryFeedStore},
    model::{list_model::ListModel, object_model::ObjectModel, registry::ModelRegistry},
    object_manager::DatabaseSnapshot,
    pipeline::{state::WaitUntilReachedParams, timeframe_clock::WaitOutcome},
    replica::{Configuration, Replica, ReplicaSpec},
    state_manager::StateManager,
    types::data_types::{FeedKey, ObjectId},
};

use super::logging::{first_seven_base64_chars, log_with_context};

/// A peer that writes to its own in-memory feed, and reads the feeds of `peers` from the same
/// [`MemoryFeedStore`].
///
/// Things the Nodes will have in common:
/// - Feed store.
/// - Registered models.
/// - Configuration.
///
/// Things that they will differ in:
/// - Feed key.
/// - Replica.
pub(crate) struct Node {
    feed_key: FeedKey,
    replica: Replica<MemoryFeed>,
}

impl Node {
    pub(crate) fn new(
        store: &MemoryFeedStore,
        feed_key: FeedKey,
        peers: &[FeedKey],
        snapshot: Option<DatabaseSnapshot>,
    ) -> Node {
        let own_feed = store.open_feed(feed_key, true);
        let mut feeds = vec![own_feed.clone()];
        feeds.extend(
            peers
                .iter()
                .filter(|peer| **peer != feed_key)
                .map(|peer| store.open_feed(*peer, false)),
        );

        let configuration = Configuration::builder()
            .stall_timeout(Duration::from_millis(200))
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .registry(registry())
            .configuration(configuration)
            .feeds(feeds)
            .write_feed(own_feed)
            .snapshot(snapshot)
            .on_create_object(create_object_handler(feed_key))
            .on_process_mutation(process_mutation_handler(feed_key))
            .on_reset_state_machine(reset_state_machine_handler(feed_key))
            .build()
            .start()
            .unwrap();

        Node { feed_key, replica }
    }

    pub(crate) fn feed_key(&self) -> FeedKey {
        self.feed_key
    }

    pub(crate) fn replica(&self) -> &Replica<MemoryFeed> {
        &self.replica
    }

    pub(crate) fn create_object(&self) -> Arc<StateManager> {
        self.replica
            .objects()
            .create_object::<ObjectModel>(None)
            .unwrap()
    }

    pub(crate) fn create_list(&self) -> Arc<StateManager> {
        self.replica.objects().create_object::<ListModel>(None).unwrap()
    }

    /// Wait until this node has processed the genesis of `object_id`.
    pub(crate) fn object(&self, object_id: &ObjectId) -> Arc<StateManager> {
        let found = poll_until(Duration::from_secs(10), || {
            self.replica.objects().object(object_id).is_some()
        });
        assert!(found, "Object {:?} never reached {}.", object_id, self.name());
        self.replica.objects().object(object_id).unwrap()
    }

    pub(crate) fn field(&self, object_id: &ObjectId, key: &str) -> Option<String> {
        self.object(object_id)
            .with_model(|model: &ObjectModel| model.get(key).map(str::to_string))
            .unwrap()
    }

    pub(crate) fn list_values(&self, object_id: &ObjectId) -> Vec<String> {
        self.object(object_id)
            .with_model(|model: &ListModel| {
                model
                    .values()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap()
    }

    /// Wait until every message currently in the node's feeds has been processed.
    pub(crate) fn wait_until_caught_up(&self) -> WaitOutcome {
        let state = self.replica.pipeline_state();
        state.set_target_timeframe(state.end_timeframe());
        state.wait_until_reached_target_timeframe(
            WaitUntilReachedParams::builder()
                .timeout(Duration::from_secs(10))
                .break_on_stall(false)
                .build(),
        )
    }

    pub(crate) fn name(&self) -> String {
        first_seven_base64_chars(&self.feed_key.bytes())
    }
}

pub(crate) fn registry() -> ModelRegistry {
    let registry = ModelRegistry::new();
    registry.register::<ObjectModel>().register::<ListModel>();
    registry
}

/// Poll `condition` every 10 milliseconds until it holds or `timeout` elapses. Returns whether it held.
pub(crate) fn poll_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

fn create_object_handler(feed_key: FeedKey) -> impl Fn(&CreateObjectEvent) + Send + Sync + 'static {
    move |create_object_event| {
        log_with_context(
            Some(feed_key),
            &format!(
                "Created Object, object: {}, type: {}",
                first_seven_base64_chars(&create_object_event.object.bytes()),
                create_object_event.type_url
            ),
        );
    }
}

fn process_mutation_handler(feed_key: FeedKey) -> impl Fn(&ProcessMutationEvent) + Send + Sync + 'static {
    move |process_mutation_event| {
        log_with_context(
            Some(feed_key),
            &format!(
                "Processed Mutation, object: {}, origin: {}[{}], index: {}, confirmed optimistic: {}",
                first_seven_base64_chars(&process_mutation_event.object.bytes()),
                first_seven_base64_chars(&process_mutation_event.feed_key.bytes()),
                process_mutation_event.seq,
                process_mutation_event.index,
                process_mutation_event.confirmed_optimistic
            ),
        );
    }
}

fn reset_state_machine_handler(feed_key: FeedKey) -> impl Fn(&ResetStateMachineEvent) + Send + Sync + 'static {
    move |reset_state_machine_event| {
        log_with_context(
            Some(feed_key),
            &format!(
                "Reset State Machine, object: {}, mutations: {}, optimistic: {}",
                first_seven_base64_chars(&reset_state_machine_event.object.bytes()),
                reset_state_machine_event.mutations,
                reset_state_machine_event.optimistic_mutations
            ),
        );
    }
}
