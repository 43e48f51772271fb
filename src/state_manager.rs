/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Optimistic concurrency for a single replicated object.
//!
//! # State
//!
//! A [`StateManager`] keeps, for its object:
//! 1. An **initial snapshot**: the object's state (possibly empty) plus a list of mutations still to
//!    be applied on top of it.
//! 2. The **mutation queue**: every confirmed mutation received since the initial snapshot, in the
//!    order computed by [`insertion_index`].
//! 3. The **optimistic mutations**: local mutations that have been applied to the live state but that
//!    have not come back through the pipeline yet, in the order they were written.
//! 4. The **state machine**, which holds the live state. It holds no authoritative data: it can
//!    always be rebuilt by resetting it to the initial snapshot and replaying the initial snapshot's
//!    mutations, the mutation queue, and the optimistic mutations, in that order.
//!
//! # Writing and processing
//!
//! [`write`](StateManager::write) applies a local mutation to the live state straight away, and
//! appends it to the write feed. When the mutation (or any other mutation) comes back through the
//! pipeline, [`process_message`](StateManager::process_message) inserts it into the mutation queue,
//! and then either:
//! - Does nothing more, if the mutation confirms the oldest optimistic mutation and landed at the end
//!   of the queue, since its effect is already in the live state in the right position.
//! - Applies it to the live state, if it landed at the end of the queue and there are no optimistic
//!   mutations.
//! - Rebuilds the state machine otherwise. This rolls back optimistic guesses that turned out to be
//!   in the wrong order.
//!
//! # Deferred initialization
//!
//! If the object's model is not in the [registry](ModelRegistry) when the state manager is created,
//! the state manager stores confirmed and optimistic mutations without applying them, until
//! [`initialize`](StateManager::initialize) succeeds.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    events::{
        Event, EventPublisher, ProcessMutationEvent, ResetStateMachineEvent, UpdateObjectEvent,
        WriteMutationEvent,
    },
    event_bus::Subscribers,
    feeds::{messages::FeedReceipt, pluggables::FeedError, writer::FeedWriter},
    model::{registry::ModelRegistry, Codec, CodecError, Model, ModelStateMachine, StateMachine},
    ordering::insertion_index,
    pipeline::trigger::Trigger,
    types::{
        crypto_primitives::hash,
        data_types::{CryptoHash, ObjectId, SubscriptionId},
        mutation::{MutationEntry, MutationMeta, ProcessMeta},
    },
};

/// Writer that a state manager appends its object's encoded mutations with.
pub type MutationWriter = Arc<dyn FeedWriter<Vec<u8>>>;

/// The state of an object at some point: a snapshot of a model, and mutations to apply on top of it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ObjectSnapshot {
    pub type_url: String,
    /// Encoded model snapshot. `None` stands for the model's empty state.
    pub snapshot: Option<Vec<u8>>,
    pub mutations: Vec<MutationEntry>,
}

impl ObjectSnapshot {
    /// Get the snapshot of an empty object of type `type_url`.
    pub fn empty(type_url: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            snapshot: None,
            mutations: Vec::new(),
        }
    }

    /// Get the snapshot of an object of model `M` in state `snapshot`.
    pub fn of_model<M: Model>(snapshot: &M::Snapshot) -> Result<Self, CodecError> {
        Ok(Self {
            type_url: M::TYPE_URL.to_string(),
            snapshot: Some(M::SnapshotCodec::encode(snapshot)?),
            mutations: Vec::new(),
        })
    }
}

struct OptimisticMutation {
    mutation: Vec<u8>,
    meta: ProcessMeta,
    receipt: Option<FeedReceipt>,
    /// Set while the mutation is being appended to the write feed.
    appending: bool,
    processed: Arc<Trigger>,
}

struct ObjectState {
    initial_snapshot: ObjectSnapshot,
    mutations: Vec<MutationEntry>,
    optimistic: VecDeque<OptimisticMutation>,
    /// Blocks of the write feed that were processed while an append was in flight, and matched no
    /// receipt. One of them may be the mutation being appended.
    early_confirmations: HashSet<FeedReceipt>,
    state_machine: Option<Box<dyn StateMachine>>,
}

impl ObjectState {
    /// Rebuild the state machine from scratch. Does nothing if it is not initialized.
    fn reset_state_machine(&mut self) -> Result<(), CodecError> {
        let Some(state_machine) = self.state_machine.as_mut() else {
            return Ok(());
        };
        state_machine.reset(self.initial_snapshot.snapshot.as_deref())?;
        for entry in self.initial_snapshot.mutations.iter().chain(self.mutations.iter()) {
            state_machine.process(&entry.mutation, &entry.meta.process_meta())?;
        }
        for optimistic in self.optimistic.iter() {
            state_machine.process(&optimistic.mutation, &optimistic.meta)?;
        }
        Ok(())
    }
}

/// What processing a confirmed mutation did to the live state.
enum Applied {
    /// The state machine is not initialized yet.
    Stored,
    /// The mutation's effect was already applied optimistically.
    AlreadyApplied,
    Incremental,
    Reset,
}

pub struct StateManager {
    object_id: ObjectId,
    type_url: String,
    registry: ModelRegistry,
    writer: Option<MutationWriter>,
    event_publisher: EventPublisher,
    state: Mutex<ObjectState>,
    update: Subscribers<ObjectId>,
}

impl StateManager {
    /// Create the state manager of `object_id`, starting from `initial_snapshot`. Without a `writer`,
    /// the object is read-only.
    ///
    /// The state machine is initialized immediately if the object's model is registered, and left
    /// uninitialized otherwise.
    pub fn new(
        object_id: ObjectId,
        initial_snapshot: ObjectSnapshot,
        registry: ModelRegistry,
        writer: Option<MutationWriter>,
        event_publisher: EventPublisher,
    ) -> Result<Self, StateManagerError> {
        let state_manager = Self {
            object_id,
            type_url: initial_snapshot.type_url.clone(),
            registry,
            writer,
            event_publisher,
            state: Mutex::new(ObjectState {
                initial_snapshot,
                mutations: Vec::new(),
                optimistic: VecDeque::new(),
                early_confirmations: HashSet::new(),
                state_machine: None,
            }),
            update: Subscribers::new(),
        };
        state_manager.initialize()?;
        Ok(state_manager)
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().state_machine.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// Create the state machine, if the model is registered now, and bring it up to date. Returns
    /// whether the state machine is initialized.
    pub fn initialize(&self) -> Result<bool, StateManagerError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.state_machine.is_some() {
                return Ok(true);
            }
            let Some(state_machine) = self.registry.create(&self.type_url) else {
                log::debug!(
                    "Deferring initialization of {:?}: model {} is not registered.",
                    self.object_id,
                    self.type_url
                );
                return Ok(false);
            };
            state.state_machine = Some(state_machine);
            state.reset_state_machine()?;
        }
        log::debug!("Initialized {:?} with model {}.", self.object_id, self.type_url);
        self.emit_update();
        Ok(true)
    }

    /// Apply `mutation` to the live state (if initialized) and append it to the write feed.
    ///
    /// If the append fails, the mutation stays applied and queued as an optimistic mutation, but will
    /// never be confirmed.
    ///
    /// The object is not locked during the append, so feed listeners may process the mutation
    /// before this returns.
    pub fn write(&self, mutation: Vec<u8>) -> Result<MutationHandle, StateManagerError> {
        let writer = self.writer.as_ref().ok_or(StateManagerError::ReadOnly {
            object: self.object_id,
        })?;
        let meta = ProcessMeta {
            author: writer.feed_key(),
        };
        let processed = Arc::new(Trigger::new());

        let applied = {
            let mut state = self.state.lock().unwrap();
            let applied = match state.state_machine.as_mut() {
                Some(state_machine) => {
                    state_machine.process(&mutation, &meta)?;
                    true
                }
                None => false,
            };
            state.optimistic.push_back(OptimisticMutation {
                mutation: mutation.clone(),
                meta,
                receipt: None,
                appending: true,
                processed: processed.clone(),
            });
            applied
        };
        if applied {
            self.emit_update();
        }

        let written = writer.write(mutation);

        let (confirmed_early, reset, queue_lengths) = {
            let mut state = self.state.lock().unwrap();
            let position = state
                .optimistic
                .iter()
                .position(|optimistic| Arc::ptr_eq(&optimistic.processed, &processed));
            let mut confirmed_early = false;
            if let Some(position) = position {
                match &written {
                    Ok(receipt) if state.early_confirmations.remove(receipt) => {
                        // Already in the mutation queue, and now applied twice.
                        state.optimistic.remove(position);
                        state.reset_state_machine()?;
                        confirmed_early = true;
                    }
                    Ok(receipt) => {
                        state.optimistic[position].receipt = Some(*receipt);
                        state.optimistic[position].appending = false;
                    }
                    Err(_) => state.optimistic[position].appending = false,
                }
            }
            if !state.optimistic.iter().any(|optimistic| optimistic.appending) {
                state.early_confirmations.clear();
            }
            (
                confirmed_early,
                confirmed_early && state.state_machine.is_some(),
                (state.mutations.len(), state.optimistic.len()),
            )
        };
        let receipt = written?;

        if reset {
            self.publish_reset(queue_lengths);
            self.emit_update();
        }
        if confirmed_early {
            processed.wake();
        }
        Event::publish(
            &self.event_publisher,
            Event::WriteMutation(WriteMutationEvent {
                timestamp: SystemTime::now(),
                object: self.object_id,
                receipt,
            }),
        );
        Ok(MutationHandle { receipt, processed })
    }

    /// Encode `mutation` of model `M` and [`write`](Self::write) it.
    pub fn write_mutation<M: Model>(
        &self,
        mutation: &M::Mutation,
    ) -> Result<MutationHandle, StateManagerError> {
        self.check_type::<M>()?;
        self.write(M::MutationCodec::encode(mutation)?)
    }

    /// Insert a confirmed mutation into the mutation queue and update the live state accordingly.
    pub fn process_message(
        &self,
        meta: MutationMeta,
        mutation: Vec<u8>,
    ) -> Result<(), StateManagerError> {
        let receipt = FeedReceipt {
            feed_key: meta.feed_key,
            seq: meta.seq,
        };
        let (feed_key, seq) = (meta.feed_key, meta.seq);

        let (confirmed, index, applied, queue_lengths) = {
            let mut state = self.state.lock().unwrap();
            let matched = state
                .optimistic
                .iter()
                .position(|optimistic| optimistic.receipt == Some(receipt));
            let confirmed = matched.and_then(|position| state.optimistic.remove(position));
            if matched.is_none()
                && self.writer.as_ref().map(|writer| writer.feed_key()) == Some(feed_key)
                && state.optimistic.iter().any(|optimistic| optimistic.appending)
            {
                state.early_confirmations.insert(receipt);
            }

            let index = insertion_index(&state.mutations, &meta);
            let at_tail = index == state.mutations.len();
            let process_meta = meta.process_meta();
            state.mutations.insert(index, MutationEntry { meta, mutation });

            let applied = if state.state_machine.is_none() {
                Applied::Stored
            } else if at_tail && matched == Some(0) {
                Applied::AlreadyApplied
            } else if at_tail && matched.is_none() && state.optimistic.is_empty() {
                let ObjectState {
                    state_machine,
                    mutations,
                    ..
                } = &mut *state;
                if let Some(state_machine) = state_machine.as_mut() {
                    state_machine.process(&mutations[index].mutation, &process_meta)?;
                }
                Applied::Incremental
            } else {
                state.reset_state_machine()?;
                Applied::Reset
            };
            (
                confirmed,
                index,
                applied,
                (state.mutations.len(), state.optimistic.len()),
            )
        };

        log::trace!(
            "Processed mutation {:?}[{}] of {:?} at index {}.",
            feed_key,
            seq,
            self.object_id,
            index
        );
        Event::publish(
            &self.event_publisher,
            Event::ProcessMutation(ProcessMutationEvent {
                timestamp: SystemTime::now(),
                object: self.object_id,
                feed_key,
                seq,
                index,
                confirmed_optimistic: confirmed.is_some(),
            }),
        );

        match applied {
            Applied::Reset => {
                self.publish_reset(queue_lengths);
                self.emit_update();
            }
            Applied::Incremental => self.emit_update(),
            Applied::AlreadyApplied | Applied::Stored => {}
        }

        if let Some(confirmed) = confirmed {
            confirmed.processed.wake();
        }
        Ok(())
    }

    /// Get a snapshot of the confirmed state, excluding optimistic mutations.
    ///
    /// If the model supports compaction, the initial snapshot and the mutation queue are collapsed
    /// into a single model snapshot. Otherwise, the snapshot keeps the initial snapshot and lists every
    /// confirmed mutation.
    pub fn create_snapshot(&self) -> Result<ObjectSnapshot, StateManagerError> {
        let state = self.state.lock().unwrap();
        if let Some(state_machine) = state.state_machine.as_ref() {
            let compacted = if state.optimistic.is_empty() {
                state_machine.snapshot()?
            } else if let Some(mut confirmed) = self.registry.create(&self.type_url) {
                confirmed.reset(state.initial_snapshot.snapshot.as_deref())?;
                for entry in state.initial_snapshot.mutations.iter().chain(state.mutations.iter()) {
                    confirmed.process(&entry.mutation, &entry.meta.process_meta())?;
                }
                confirmed.snapshot()?
            } else {
                None
            };
            if let Some(snapshot) = compacted {
                return Ok(ObjectSnapshot {
                    type_url: self.type_url.clone(),
                    snapshot: Some(snapshot),
                    mutations: Vec::new(),
                });
            }
        }

        Ok(ObjectSnapshot {
            type_url: self.type_url.clone(),
            snapshot: state.initial_snapshot.snapshot.clone(),
            mutations: state
                .initial_snapshot
                .mutations
                .iter()
                .chain(state.mutations.iter())
                .cloned()
                .collect(),
        })
    }

    /// Replace the initial snapshot with `snapshot` and clear the mutation queue. Optimistic mutations
    /// are kept and re-applied on top.
    pub fn reset_to_snapshot(&self, snapshot: ObjectSnapshot) -> Result<(), StateManagerError> {
        if snapshot.type_url != self.type_url {
            return Err(StateManagerError::ModelTypeMismatch {
                expected: self.type_url.clone(),
                found: snapshot.type_url,
            });
        }
        let (initialized, queue_lengths) = {
            let mut state = self.state.lock().unwrap();
            state.initial_snapshot = snapshot;
            state.mutations.clear();
            state.reset_state_machine()?;
            (
                state.state_machine.is_some(),
                (state.mutations.len(), state.optimistic.len()),
            )
        };
        if initialized {
            self.publish_reset(queue_lengths);
            self.emit_update();
        }
        Ok(())
    }

    /// Call `f` with the live state of the object's model.
    pub fn with_model<M: Model, R>(&self, f: impl FnOnce(&M) -> R) -> Result<R, StateManagerError> {
        self.check_type::<M>()?;
        let state = self.state.lock().unwrap();
        let state_machine = state
            .state_machine
            .as_ref()
            .ok_or(StateManagerError::ModelNotInitialized {
                object: self.object_id,
            })?;
        let model = state_machine
            .as_any()
            .downcast_ref::<ModelStateMachine<M>>()
            .ok_or_else(|| StateManagerError::ModelTypeMismatch {
                expected: M::TYPE_URL.to_string(),
                found: state_machine.type_url().to_string(),
            })?
            .model();
        Ok(f(model))
    }

    /// Get the SHA256 hash of the encoded snapshot of the live state, or `None` if the model does not
    /// support snapshots.
    pub fn state_digest(&self) -> Result<Option<CryptoHash>, StateManagerError> {
        let state = self.state.lock().unwrap();
        let state_machine = state
            .state_machine
            .as_ref()
            .ok_or(StateManagerError::ModelNotInitialized {
                object: self.object_id,
            })?;
        Ok(state_machine.snapshot()?.map(|snapshot| hash(&snapshot)))
    }

    /// Get the mutation queue, in order.
    pub fn mutations(&self) -> Vec<MutationEntry> {
        self.state.lock().unwrap().mutations.clone()
    }

    /// Get the number of optimistic mutations that have not been confirmed yet.
    pub fn pending_mutations(&self) -> usize {
        self.state.lock().unwrap().optimistic.len()
    }

    /// Register `callback` to be called every time the live state changes.
    pub fn subscribe(&self, callback: impl Fn(&ObjectId) + Send + Sync + 'static) -> SubscriptionId {
        self.update.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.update.unsubscribe(subscription)
    }

    fn check_type<M: Model>(&self) -> Result<(), StateManagerError> {
        if self.type_url != M::TYPE_URL {
            return Err(StateManagerError::ModelTypeMismatch {
                expected: self.type_url.clone(),
                found: M::TYPE_URL.to_string(),
            });
        }
        Ok(())
    }

    fn publish_reset(&self, (mutations, optimistic_mutations): (usize, usize)) {
        Event::publish(
            &self.event_publisher,
            Event::ResetStateMachine(ResetStateMachineEvent {
                timestamp: SystemTime::now(),
                object: self.object_id,
                mutations,
                optimistic_mutations,
            }),
        );
    }

    fn emit_update(&self) {
        self.update.emit(&self.object_id);
        Event::publish(
            &self.event_publisher,
            Event::UpdateObject(UpdateObjectEvent {
                timestamp: SystemTime::now(),
                object: self.object_id,
            }),
        );
    }
}

/// Returned by [`StateManager::write`] to track a written mutation.
#[derive(Clone)]
pub struct MutationHandle {
    receipt: FeedReceipt,
    processed: Arc<Trigger>,
}

impl MutationHandle {
    /// Get where the mutation was appended.
    pub fn receipt(&self) -> FeedReceipt {
        self.receipt
    }

    pub fn is_processed(&self) -> bool {
        self.processed.is_woken()
    }

    /// Block until the mutation has come back through the pipeline and been processed.
    pub fn wait_to_be_processed(&self) {
        self.processed.wait()
    }

    /// Like [`wait_to_be_processed`](Self::wait_to_be_processed), but gives up after `timeout`. Returns
    /// whether the mutation was processed.
    pub fn wait_to_be_processed_timeout(&self, timeout: Duration) -> bool {
        self.processed.wait_timeout(timeout)
    }
}

#[derive(Debug)]
pub enum StateManagerError {
    ReadOnly { object: ObjectId },
    ModelNotInitialized { object: ObjectId },
    ModelTypeMismatch { expected: String, found: String },
    Codec(CodecError),
    Feed(FeedError),
}

impl From<CodecError> for StateManagerError {
    fn from(value: CodecError) -> Self {
        StateManagerError::Codec(value)
    }
}

impl From<FeedError> for StateManagerError {
    fn from(value: FeedError) -> Self {
        StateManagerError::Feed(value)
    }
}
