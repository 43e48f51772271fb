/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The business logic of replicated objects.
//!
//! # Models
//!
//! Library users describe a kind of object by implementing [`Model`]: the model type itself holds the
//! object's state, and [`process`](Model::process) applies one mutation to it. A model must be
//! deterministic: given the same snapshot and the same ordered list of mutations (and their
//! [`ProcessMeta`]), every replica must end up in the same state. This is what lets a
//! [`StateManager`](crate::state_manager::StateManager) throw away the live state at any time and
//! rebuild it by replaying.
//!
//! # State machines
//!
//! State managers do not know the concrete model type of their object. They drive it through
//! [`StateMachine`], an object-safe interface over encoded mutations and snapshots, implemented for
//! every model by [`ModelStateMachine`]. State machines are created by type URL from a
//! [`ModelRegistry`](registry::ModelRegistry).

pub mod list_model;

pub mod object_model;

pub mod registry;

use std::{any::Any, io, marker::PhantomData};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::mutation::ProcessMeta;

/// Encodes values of type `T` to bytes and decodes them back.
pub trait Codec<T> {
    fn encode(value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(bytes: &[u8]) -> Result<T, CodecError>;
}

/// [`Codec`] for every type that implements Borsh serialization.
pub struct BorshCodec<T>(PhantomData<T>);

impl<T: BorshSerialize + BorshDeserialize> Codec<T> for BorshCodec<T> {
    fn encode(value: &T) -> Result<Vec<u8>, CodecError> {
        value.try_to_vec().map_err(CodecError::Encode)
    }

    fn decode(bytes: &[u8]) -> Result<T, CodecError> {
        T::try_from_slice(bytes).map_err(CodecError::Decode)
    }
}

#[derive(Debug)]
pub enum CodecError {
    Encode(io::Error),
    Decode(io::Error),
}

/// The state and business logic of one kind of replicated object.
pub trait Model: Default + Send + 'static {
    /// Identifies this kind of object in the [registry](registry::ModelRegistry) and in snapshots.
    /// Must be unique among the models of a registry.
    const TYPE_URL: &'static str;

    type Mutation;
    type Snapshot;
    type MutationCodec: Codec<Self::Mutation>;
    type SnapshotCodec: Codec<Self::Snapshot>;

    /// Apply `mutation`, written by `meta.author`.
    fn process(&mut self, mutation: Self::Mutation, meta: &ProcessMeta);

    /// Get a compact representation of the current state, or `None` if this model does not support
    /// compaction.
    fn snapshot(&self) -> Option<Self::Snapshot>;

    /// Replace the current state with `snapshot`, or with the empty state if `snapshot` is `None`.
    fn reset(&mut self, snapshot: Option<Self::Snapshot>);
}

/// Object-safe interface through which state managers drive a model.
pub trait StateMachine: Send {
    fn type_url(&self) -> &'static str;

    fn reset(&mut self, snapshot: Option<&[u8]>) -> Result<(), CodecError>;

    fn process(&mut self, mutation: &[u8], meta: &ProcessMeta) -> Result<(), CodecError>;

    fn snapshot(&self) -> Result<Option<Vec<u8>>, CodecError>;

    fn as_any(&self) -> &dyn Any;
}

/// Adapts a [`Model`] into a [`StateMachine`] using the model's codecs.
#[derive(Default)]
pub struct ModelStateMachine<M: Model> {
    model: M,
}

impl<M: Model> ModelStateMachine<M> {
    pub fn new() -> Self {
        Self {
            model: M::default(),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: Model> StateMachine for ModelStateMachine<M> {
    fn type_url(&self) -> &'static str {
        M::TYPE_URL
    }

    fn reset(&mut self, snapshot: Option<&[u8]>) -> Result<(), CodecError> {
        let snapshot = snapshot.map(M::SnapshotCodec::decode).transpose()?;
        self.model.reset(snapshot);
        Ok(())
    }

    fn process(&mut self, mutation: &[u8], meta: &ProcessMeta) -> Result<(), CodecError> {
        let mutation = M::MutationCodec::decode(mutation)?;
        self.model.process(mutation, meta);
        Ok(())
    }

    fn snapshot(&self) -> Result<Option<Vec<u8>>, CodecError> {
        self.model
            .snapshot()
            .map(|snapshot| M::SnapshotCodec::encode(&snapshot))
            .transpose()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
