/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Routes the blocks of a pipeline to the state managers of the objects they are about.
//!
//! Every payload written through a pipeline is an [`ObjectMessage`]: either the genesis of a new
//! object, or a mutation of an existing one. The [`ObjectManager`] creates a
//! [`StateManager`] for every genesis it processes, and hands every mutation to the state manager of
//! its object.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, RwLock, Weak},
    time::SystemTime,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    events::{CreateObjectEvent, Event, EventPublisher},
    feeds::{
        messages::FeedBlock,
        pluggables::FeedError,
        writer::{FeedWriter, MappedFeedWriter},
    },
    model::{registry::ModelRegistry, BorshCodec, Codec, CodecError, Model},
    state_manager::{MutationWriter, ObjectSnapshot, StateManager, StateManagerError},
    types::{
        data_types::{FeedKey, ObjectId, SubscriptionId},
        timeframe::Timeframe,
    },
};

/// Payload of every block in a pipeline.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ObjectMessage {
    Genesis {
        object_id: ObjectId,
        type_url: String,
        snapshot: Option<Vec<u8>>,
    },
    Mutation {
        object_id: ObjectId,
        mutation: Vec<u8>,
    },
}

/// The state of every object at `timeframe`.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DatabaseSnapshot {
    pub timeframe: Timeframe,
    pub objects: BTreeMap<ObjectId, ObjectSnapshot>,
}

type Objects = RwLock<BTreeMap<ObjectId, Arc<StateManager>>>;

pub struct ObjectManager {
    registry: ModelRegistry,
    writer: Option<MutationWriter>,
    event_publisher: EventPublisher,
    admitted_feeds: RwLock<HashSet<FeedKey>>,
    objects: Arc<Objects>,
    registry_subscription: SubscriptionId,
}

impl ObjectManager {
    /// Create an object manager without objects. Objects are writable only if `writer` is set.
    pub fn new(
        registry: ModelRegistry,
        writer: Option<MutationWriter>,
        event_publisher: EventPublisher,
    ) -> Self {
        let objects: Arc<Objects> = Arc::default();
        let registry_subscription = registry.subscribe(initialize_deferred(Arc::downgrade(&objects)));
        Self {
            registry,
            writer,
            event_publisher,
            admitted_feeds: RwLock::default(),
            objects,
            registry_subscription,
        }
    }

    /// Accept blocks from `feed_key` from now on.
    pub fn admit_feed(&self, feed_key: FeedKey) {
        if self.admitted_feeds.write().unwrap().insert(feed_key) {
            log::debug!("Admitted feed {:?}.", feed_key);
        }
    }

    pub fn is_admitted(&self, feed_key: &FeedKey) -> bool {
        self.admitted_feeds.read().unwrap().contains(feed_key)
    }

    pub fn object(&self, object_id: &ObjectId) -> Option<Arc<StateManager>> {
        self.objects.read().unwrap().get(object_id).cloned()
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.read().unwrap().keys().copied().collect()
    }

    /// Create an object of model `M` in state `snapshot` (or empty), and write its genesis.
    pub fn create_object<M: Model>(
        &self,
        snapshot: Option<&M::Snapshot>,
    ) -> Result<Arc<StateManager>, ObjectManagerError> {
        let writer = self.writer.as_ref().ok_or(ObjectManagerError::ReadOnly)?;
        let object_id = ObjectId::random();
        let snapshot = snapshot.map(M::SnapshotCodec::encode).transpose()?;
        let initial_snapshot = ObjectSnapshot {
            type_url: M::TYPE_URL.to_string(),
            snapshot: snapshot.clone(),
            mutations: Vec::new(),
        };

        // Insert before writing, so that the genesis finds the object when it comes back.
        let state_manager = self.insert_object(object_id, initial_snapshot)?;
        let genesis = ObjectMessage::Genesis {
            object_id,
            type_url: M::TYPE_URL.to_string(),
            snapshot,
        };
        writer.write(BorshCodec::<ObjectMessage>::encode(&genesis)?)?;
        Ok(state_manager)
    }

    /// Decode the payload of `block` and apply it to its object.
    pub fn process_block(&self, block: FeedBlock) -> Result<(), ObjectManagerError> {
        if !self.is_admitted(&block.feed_key) {
            return Err(ObjectManagerError::UnknownFeed {
                feed: block.feed_key,
            });
        }

        let meta = block.mutation_meta();
        match BorshCodec::<ObjectMessage>::decode(&block.data.payload)? {
            ObjectMessage::Genesis {
                object_id,
                type_url,
                snapshot,
            } => {
                if self.objects.read().unwrap().contains_key(&object_id) {
                    log::trace!("Skipping genesis of existing object {:?}.", object_id);
                    return Ok(());
                }
                let initial_snapshot = ObjectSnapshot {
                    type_url,
                    snapshot,
                    mutations: Vec::new(),
                };
                self.insert_object(object_id, initial_snapshot)?;
                Ok(())
            }
            ObjectMessage::Mutation {
                object_id,
                mutation,
            } => {
                let state_manager = self
                    .object(&object_id)
                    .ok_or(ObjectManagerError::UnknownObject { object: object_id })?;
                state_manager.process_message(meta, mutation)?;
                Ok(())
            }
        }
    }

    /// Get the snapshot of every object, labelled with `timeframe`, the timeframe they are at.
    pub fn create_snapshot(&self, timeframe: Timeframe) -> Result<DatabaseSnapshot, ObjectManagerError> {
        let objects = self
            .objects
            .read()
            .unwrap()
            .iter()
            .map(|(object_id, state_manager)| (*object_id, state_manager.clone()))
            .collect::<Vec<_>>();

        let mut snapshot = DatabaseSnapshot {
            timeframe,
            objects: BTreeMap::new(),
        };
        for (object_id, state_manager) in objects {
            snapshot
                .objects
                .insert(object_id, state_manager.create_snapshot()?);
        }
        Ok(snapshot)
    }

    /// Reset every object in `snapshot` to its state in it, creating objects that do not exist yet.
    pub fn restore_snapshot(&self, snapshot: DatabaseSnapshot) -> Result<(), ObjectManagerError> {
        log::info!(
            "Restoring {} objects at timeframe {}.",
            snapshot.objects.len(),
            snapshot.timeframe
        );
        for (object_id, object_snapshot) in snapshot.objects {
            match self.object(&object_id) {
                Some(state_manager) => state_manager.reset_to_snapshot(object_snapshot)?,
                None => {
                    self.insert_object(object_id, object_snapshot)?;
                }
            }
        }
        Ok(())
    }

    fn insert_object(
        &self,
        object_id: ObjectId,
        initial_snapshot: ObjectSnapshot,
    ) -> Result<Arc<StateManager>, ObjectManagerError> {
        let type_url = initial_snapshot.type_url.clone();
        if self.objects.read().unwrap().contains_key(&object_id) {
            return Err(ObjectManagerError::ObjectAlreadyExists { object: object_id });
        }
        // Created outside the lock: initialization may call event handlers.
        let state_manager = Arc::new(StateManager::new(
            object_id,
            initial_snapshot,
            self.registry.clone(),
            self.object_writer(object_id),
            self.event_publisher.clone(),
        )?);
        {
            let mut objects = self.objects.write().unwrap();
            if objects.contains_key(&object_id) {
                return Err(ObjectManagerError::ObjectAlreadyExists { object: object_id });
            }
            objects.insert(object_id, state_manager.clone());
        }

        log::debug!("Created object {:?} of type {}.", object_id, type_url);
        Event::publish(
            &self.event_publisher,
            Event::CreateObject(CreateObjectEvent {
                timestamp: SystemTime::now(),
                object: object_id,
                type_url,
            }),
        );
        Ok(state_manager)
    }

    /// Get a writer that wraps the mutations of `object_id` into [`ObjectMessage`]s.
    fn object_writer(&self, object_id: ObjectId) -> Option<MutationWriter> {
        let writer = self.writer.clone()?;
        let map = move |mutation: Vec<u8>| {
            ObjectMessage::Mutation {
                object_id,
                mutation,
            }
            .try_to_vec()
            .map_err(FeedError::from)
        };
        let object_writer: MutationWriter = Arc::new(MappedFeedWriter::new(writer, map));
        Some(object_writer)
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.registry_subscription);
    }
}

/// Get a registry callback that initializes the objects of a newly registered model.
fn initialize_deferred(objects: Weak<Objects>) -> impl Fn(&String) + Send + Sync + 'static {
    move |type_url: &String| {
        let Some(objects) = objects.upgrade() else {
            return;
        };
        let pending: Vec<Arc<StateManager>> = objects
            .read()
            .unwrap()
            .values()
            .filter(|state_manager| state_manager.type_url() == type_url.as_str() && !state_manager.is_initialized())
            .cloned()
            .collect();
        for state_manager in pending {
            if let Err(err) = state_manager.initialize() {
                log::error!(
                    "Failed to initialize {:?} with model {}: {:?}",
                    state_manager.object_id(),
                    type_url,
                    err
                );
            }
        }
    }
}

#[derive(Debug)]
pub enum ObjectManagerError {
    UnknownFeed { feed: FeedKey },
    UnknownObject { object: ObjectId },
    ObjectAlreadyExists { object: ObjectId },
    ReadOnly,
    Codec(CodecError),
    StateManager(StateManagerError),
    Feed(FeedError),
}

impl From<CodecError> for ObjectManagerError {
    fn from(value: CodecError) -> Self {
        ObjectManagerError::Codec(value)
    }
}

impl From<StateManagerError> for ObjectManagerError {
    fn from(value: StateManagerError) -> Self {
        ObjectManagerError::StateManager(value)
    }
}

impl From<FeedError> for ObjectManagerError {
    fn from(value: FeedError) -> Self {
        ObjectManagerError::Feed(value)
    }
}
