/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Registries of event handlers and runtime subscribers.
//!
//! [`EventHandlers`] holds the handlers registered once, when a [replica](crate::replica) is built,
//! for each kind of [`Event`]. [`Subscribers`] is a small observer list used by individual components
//! (timeframe clocks, pipelines, objects, and the model registry) to let callers subscribe and
//! unsubscribe at runtime.
//!
//! Both dispatch synchronously on the thread that emits the event.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use crate::events::*;
use crate::logging::Logger;
use crate::types::data_types::SubscriptionId;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Handlers for every kind of [`Event`], fired synchronously by [`fire_handlers`](Self::fire_handlers).
pub struct EventHandlers {
    pub(crate) update_timeframe_handlers: Vec<HandlerPtr<UpdateTimeframeEvent>>,
    pub(crate) stall_handlers: Vec<HandlerPtr<StallEvent>>,
    pub(crate) consume_message_handlers: Vec<HandlerPtr<ConsumeMessageEvent>>,
    pub(crate) create_object_handlers: Vec<HandlerPtr<CreateObjectEvent>>,
    pub(crate) write_mutation_handlers: Vec<HandlerPtr<WriteMutationEvent>>,
    pub(crate) process_mutation_handlers: Vec<HandlerPtr<ProcessMutationEvent>>,
    pub(crate) reset_state_machine_handlers: Vec<HandlerPtr<ResetStateMachineEvent>>,
    pub(crate) update_object_handlers: Vec<HandlerPtr<UpdateObjectEvent>>,
}

impl EventHandlers {
    /// Collect the user-provided handlers, adding the default [logger](crate::logging) of every event
    /// kind if `log_events` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        update_timeframe_handler: Option<HandlerPtr<UpdateTimeframeEvent>>,
        stall_handler: Option<HandlerPtr<StallEvent>>,
        consume_message_handler: Option<HandlerPtr<ConsumeMessageEvent>>,
        create_object_handler: Option<HandlerPtr<CreateObjectEvent>>,
        write_mutation_handler: Option<HandlerPtr<WriteMutationEvent>>,
        process_mutation_handler: Option<HandlerPtr<ProcessMutationEvent>>,
        reset_state_machine_handler: Option<HandlerPtr<ResetStateMachineEvent>>,
        update_object_handler: Option<HandlerPtr<UpdateObjectEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            update_timeframe_handlers: handlers(log_events, update_timeframe_handler),
            stall_handlers: handlers(log_events, stall_handler),
            consume_message_handlers: handlers(log_events, consume_message_handler),
            create_object_handlers: handlers(log_events, create_object_handler),
            write_mutation_handlers: handlers(log_events, write_mutation_handler),
            process_mutation_handlers: handlers(log_events, process_mutation_handler),
            reset_state_machine_handlers: handlers(log_events, reset_state_machine_handler),
            update_object_handlers: handlers(log_events, update_object_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.update_timeframe_handlers.is_empty()
            && self.stall_handlers.is_empty()
            && self.consume_message_handlers.is_empty()
            && self.create_object_handlers.is_empty()
            && self.write_mutation_handlers.is_empty()
            && self.process_mutation_handlers.is_empty()
            && self.reset_state_machine_handlers.is_empty()
            && self.update_object_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::UpdateTimeframe(update_timeframe_event) => self
                .update_timeframe_handlers
                .iter()
                .for_each(|handler| handler(&update_timeframe_event)),

            Event::Stall(stall_event) => self
                .stall_handlers
                .iter()
                .for_each(|handler| handler(&stall_event)),

            Event::ConsumeMessage(consume_message_event) => self
                .consume_message_handlers
                .iter()
                .for_each(|handler| handler(&consume_message_event)),

            Event::CreateObject(create_object_event) => self
                .create_object_handlers
                .iter()
                .for_each(|handler| handler(&create_object_event)),

            Event::WriteMutation(write_mutation_event) => self
                .write_mutation_handlers
                .iter()
                .for_each(|handler| handler(&write_mutation_event)),

            Event::ProcessMutation(process_mutation_event) => self
                .process_mutation_handlers
                .iter()
                .for_each(|handler| handler(&process_mutation_event)),

            Event::ResetStateMachine(reset_state_machine_event) => self
                .reset_state_machine_handlers
                .iter()
                .for_each(|handler| handler(&reset_state_machine_event)),

            Event::UpdateObject(update_object_event) => self
                .update_object_handlers
                .iter()
                .for_each(|handler| handler(&update_object_event)),
        }
    }
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

type SubscriberPtr<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A list of callbacks that are invoked, in subscription order, every time a value is
/// [`emit`](Subscribers::emit)-ted.
///
/// Callbacks are invoked after the internal lock is released, so a callback may itself subscribe or
/// unsubscribe.
pub struct Subscribers<T> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, SubscriberPtr<T>)>>,
}

impl<T> Subscribers<T> {
    /// Create an empty list of subscribers.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register `callback` to be invoked on every emitted value.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove the callback registered under `id`. Returns whether a callback was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let len_before = subscribers.len();
        subscribers.retain(|(subscription, _)| *subscription != id);
        subscribers.len() != len_before
    }

    /// Get the number of registered callbacks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Get whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Invoke every registered callback with `value`.
    pub fn emit(&self, value: &T) {
        let subscribers: Vec<SubscriberPtr<T>> = self
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        subscribers.iter().for_each(|callback| callback(value));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, SubscriberPtr<T>)>> {
        // Poisoned only by a panicking callback; the list itself is intact.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}
