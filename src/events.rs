/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the pipeline and by object state managers.
//!
//! Note: an event for a given action indicates that the action has been completed. Events are
//! dispatched synchronously to the [handlers](crate::event_bus::EventHandlers) registered by the
//! library user, on the thread that completed the action, and never while internal locks are held.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use crate::{
    event_bus::EventHandlers,
    feeds::messages::FeedReceipt,
    types::{
        data_types::{FeedKey, ObjectId, SeqNumber},
        timeframe::Timeframe,
    },
};

/// Optional, shared handle to the registered event handlers. `None` means that nobody is listening.
pub type EventPublisher = Option<Arc<EventHandlers>>;

#[derive(Clone)]
pub enum Event {
    // Events emitted by the pipeline.
    UpdateTimeframe(UpdateTimeframeEvent),
    Stall(StallEvent),
    ConsumeMessage(ConsumeMessageEvent),
    // Events emitted by object state.
    CreateObject(CreateObjectEvent),
    WriteMutation(WriteMutationEvent),
    ProcessMutation(ProcessMutationEvent),
    ResetStateMachine(ResetStateMachineEvent),
    UpdateObject(UpdateObjectEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &EventPublisher, event: Event) {
        if let Some(event_handlers) = event_publisher {
            event_handlers.fire_handlers(event)
        }
    }
}

/// The processed timeframe of a pipeline advanced after a consumed message finished processing.
#[derive(Clone)]
pub struct UpdateTimeframeEvent {
    pub timestamp: SystemTime,
    pub timeframe: Timeframe,
}

/// No feed had a deliverable message for `stall_timeout`, although undelivered messages exist.
#[derive(Clone)]
pub struct StallEvent {
    pub timestamp: SystemTime,
    pub feeds: usize,
    pub stall_timeout: Duration,
    pub timeframe: Timeframe,
}

/// A message was handed to the pipeline's consumer.
#[derive(Clone)]
pub struct ConsumeMessageEvent {
    pub timestamp: SystemTime,
    pub feed_key: FeedKey,
    pub seq: SeqNumber,
}

/// A new object was instantiated, either locally or from a genesis message.
#[derive(Clone)]
pub struct CreateObjectEvent {
    pub timestamp: SystemTime,
    pub object: ObjectId,
    pub type_url: String,
}

/// A local mutation was applied optimistically and appended to the write feed.
#[derive(Clone)]
pub struct WriteMutationEvent {
    pub timestamp: SystemTime,
    pub object: ObjectId,
    pub receipt: FeedReceipt,
}

/// A confirmed mutation was inserted into an object's mutation queue.
#[derive(Clone)]
pub struct ProcessMutationEvent {
    pub timestamp: SystemTime,
    pub object: ObjectId,
    pub feed_key: FeedKey,
    pub seq: SeqNumber,
    /// Position the mutation was inserted at in the object's mutation queue.
    pub index: usize,
    /// Whether the mutation confirmed a local optimistic mutation.
    pub confirmed_optimistic: bool,
}

/// An object's state machine was rebuilt from its snapshot and mutation queues.
#[derive(Clone)]
pub struct ResetStateMachineEvent {
    pub timestamp: SystemTime,
    pub object: ObjectId,
    pub mutations: usize,
    pub optimistic_mutations: usize,
}

/// The live state of an object changed.
#[derive(Clone)]
pub struct UpdateObjectEvent {
    pub timestamp: SystemTime,
    pub object: ObjectId,
}
