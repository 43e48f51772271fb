/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is one peer's view of a set of replicated objects. It reads the feeds of every peer it
//! knows about through a [pipeline](crate::pipeline), applies the object messages in them through
//! an [object manager](crate::object_manager), and writes its own mutations to a single writable
//! feed.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Readers and writers
//!
//! Not every replica has to write. A replica started without a `write_feed` still processes every
//! feed it is given, but its objects are read-only, and [`create_object`](ObjectManager::create_object)
//! fails on it.
//!
//! ## Starting a replica
//!
//! Here is an example that demonstrates how to build and start running a replica using the builder
//! pattern:
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .registry(registry)
//!     .configuration(configuration)
//!     .feeds(vec![own_feed.clone(), peer_feed])
//!     .write_feed(own_feed)
//!     .on_process_mutation(process_mutation_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.registry(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! - `.feeds(...)` and `.write_feed(...)`, to set the feeds to read and the feed to write to.
//! - `.snapshot(...)`, to start from a [database snapshot](DatabaseSnapshot) instead of from the
//!   start of every feed.
//! - The setters for registering user-defined event handlers for events from [crate::events]:
//!   `.on_update_timeframe(...)`, `.on_stall(...)`, `.on_consume_message(...)`,
//!   `.on_create_object(...)`, `.on_write_mutation(...)`, `.on_process_mutation(...)`,
//!   `.on_reset_state_machine(...)`, and `.on_update_object(...)`.
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .stall_timeout(Duration::from_millis(500))
//!     .log_events(true)
//!     .build()
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::event_bus::*;
use crate::events::*;
use crate::feeds::pluggables::Feed;
use crate::model::registry::ModelRegistry;
use crate::object_manager::{DatabaseSnapshot, ObjectManager, ObjectManagerError};
use crate::pipeline::state::PipelineState;
use crate::pipeline::{Pipeline, PipelineConfiguration, PipelineConsumer, PipelineError};
use crate::state_manager::MutationWriter;

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The stall timeout, which is how long the replica's pipeline may go without a deliverable
///    message, while undelivered messages exist, before it reports a [stall](StallEvent).
/// 2. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Debug, TypedBuilder)]
pub struct Configuration {
    #[builder(default = Duration::from_millis(1000), setter(doc = "Set the stall timeout. Optional, defaults to 1 second."))]
    pub stall_timeout: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl From<Configuration> for PipelineConfiguration {
    fn from(configuration: Configuration) -> Self {
        PipelineConfiguration {
            stall_timeout: configuration.stall_timeout,
            log_events: configuration.log_events,
        }
    }
}

/// Stores all necessary parameters and feeds required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.registry(...)`
    - `.configuration(...)`

    Optional:
    - `.feeds(...)`
    - `.write_feed(...)`
    - `.snapshot(...)`
    - `.on_update_timeframe(...)`
    - `.on_stall(...)`
    - `.on_consume_message(...)`
    - `.on_create_object(...)`
    - `.on_write_mutation(...)`
    - `.on_process_mutation(...)`
    - `.on_reset_state_machine(...)`
    - `.on_update_object(...)`
    "
))]
pub struct ReplicaSpec<F: Feed> {
    // Required parameters
    #[builder(setter(doc = "Set the registry of models the replica can instantiate objects of. Required."))]
    registry: ModelRegistry,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(doc = "Set the feeds to read. Must include the write feed, if any. Optional."))]
    feeds: Vec<F>,
    #[builder(default, setter(strip_option, doc = "Set the writable feed the replica's mutations are written to. Optional: replicas without one are read-only."))]
    write_feed: Option<F>,
    #[builder(default, setter(doc = "Set a database snapshot to start from, if any. Every feed in its timeframe must be among `feeds`. Optional."))]
    snapshot: Option<DatabaseSnapshot>,
    // Optional event handlers
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateTimeframeEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<UpdateTimeframeEvent>),
    doc = "Register a handler closure to be invoked after the replica's processed timeframe advances. Optional."))]
    on_update_timeframe: Option<HandlerPtr<UpdateTimeframeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StallEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<StallEvent>),
    doc = "Register a handler closure to be invoked after the replica's pipeline stalls. Optional."))]
    on_stall: Option<HandlerPtr<StallEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConsumeMessageEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ConsumeMessageEvent>),
    doc = "Register a handler closure to be invoked after the replica's pipeline hands out a message. Optional."))]
    on_consume_message: Option<HandlerPtr<ConsumeMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CreateObjectEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<CreateObjectEvent>),
    doc = "Register a handler closure to be invoked after the replica instantiates an object. Optional."))]
    on_create_object: Option<HandlerPtr<CreateObjectEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&WriteMutationEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<WriteMutationEvent>),
    doc = "Register a handler closure to be invoked after the replica writes a local mutation. Optional."))]
    on_write_mutation: Option<HandlerPtr<WriteMutationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProcessMutationEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ProcessMutationEvent>),
    doc = "Register a handler closure to be invoked after the replica processes a confirmed mutation. Optional."))]
    on_process_mutation: Option<HandlerPtr<ProcessMutationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ResetStateMachineEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ResetStateMachineEvent>),
    doc = "Register a handler closure to be invoked after the replica rebuilds an object's state machine. Optional."))]
    on_reset_state_machine: Option<HandlerPtr<ResetStateMachineEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateObjectEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<UpdateObjectEvent>),
    doc = "Register a handler closure to be invoked after the state of one of the replica's objects changes. Optional."))]
    on_update_object: Option<HandlerPtr<UpdateObjectEvent>>,
}

impl<F: Feed> ReplicaSpec<F> {
    /// Wires up the replica's pipeline and object manager, and starts the thread that feeds the
    /// pipeline's blocks to the object manager.
    pub fn start(self) -> Result<Replica<F>, ReplicaError> {
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_update_timeframe,
            self.on_stall,
            self.on_consume_message,
            self.on_create_object,
            self.on_write_mutation,
            self.on_process_mutation,
            self.on_reset_state_machine,
            self.on_update_object,
        );
        let event_publisher: EventPublisher = if !event_handlers.is_empty() {
            Some(Arc::new(event_handlers))
        } else {
            None
        };

        let pipeline = Pipeline::new(self.configuration.into(), event_publisher.clone());
        for feed in self.feeds {
            pipeline.add_feed(feed);
        }
        let writer: Option<MutationWriter> = match self.write_feed {
            Some(write_feed) => {
                pipeline.set_write_feed(write_feed)?;
                Some(Arc::new(pipeline.writer()?))
            }
            None => None,
        };

        let object_manager = Arc::new(ObjectManager::new(self.registry, writer, event_publisher));
        for feed in pipeline.state().feeds() {
            object_manager.admit_feed(feed.key());
        }

        if let Some(snapshot) = self.snapshot {
            let timeframe = snapshot.timeframe.clone();
            object_manager.restore_snapshot(snapshot)?;
            pipeline.set_cursor(timeframe)?;
        }

        pipeline.start()?;
        let consumer = pipeline.consume()?;
        let processor = start_processing(consumer, object_manager.clone());

        Ok(Replica {
            pipeline,
            object_manager,
            processor: Some(processor),
        })
    }
}

/// Hand every block `consumer` yields to `object_manager`, until the pipeline stops or a block cannot
/// be processed.
fn start_processing<F: Feed>(
    consumer: PipelineConsumer<F>,
    object_manager: Arc<ObjectManager>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut consumer = consumer;
        while let Some(block) = consumer.next() {
            let (feed_key, seq) = (block.feed_key, block.seq);
            if let Err(err) = object_manager.process_block(block) {
                log::error!(
                    "Stopped processing at {:?}[{}]: {:?}",
                    feed_key,
                    seq,
                    err
                );
                // The failed block must not count as processed.
                consumer.abort();
                return;
            }
        }
    })
}

/// A handle to a running replica. When this value is dropped, the replica's pipeline is stopped and
/// its processing thread is joined.
pub struct Replica<F: Feed> {
    pipeline: Pipeline<F>,
    object_manager: Arc<ObjectManager>,
    processor: Option<JoinHandle<()>>,
}

impl<F: Feed> Replica<F> {
    /// Get the replica's objects.
    pub fn objects(&self) -> &Arc<ObjectManager> {
        &self.object_manager
    }

    /// Get an accessor for the timeframes and feeds of the replica's pipeline.
    pub fn pipeline_state(&self) -> PipelineState<F> {
        self.pipeline.state()
    }

    /// Start reading `feed`, and accept the object messages in it.
    pub fn add_feed(&self, feed: F) {
        self.object_manager.admit_feed(feed.key());
        self.pipeline.add_feed(feed);
    }

    /// Get the state of every object at the replica's current processed timeframe. Processing is
    /// paused while the snapshot is taken.
    pub fn create_snapshot(&self) -> Result<DatabaseSnapshot, ReplicaError> {
        let was_paused = self.pipeline.is_paused();
        self.pipeline.pause()?;
        let snapshot = self
            .object_manager
            .create_snapshot(self.pipeline.state().timeframe());
        if !was_paused {
            self.pipeline.unpause()?;
        }
        Ok(snapshot?)
    }

    /// Stop handing out blocks to the replica's objects. Must not be called from an event handler
    /// that runs on the processing thread.
    pub fn pause(&self) -> Result<(), ReplicaError> {
        Ok(self.pipeline.pause()?)
    }

    pub fn unpause(&self) -> Result<(), ReplicaError> {
        Ok(self.pipeline.unpause()?)
    }
}

impl<F: Feed> Drop for Replica<F> {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.stop() {
            log::error!("Failed to stop pipeline: {:?}", err);
        }
        if let Some(processor) = self.processor.take() {
            if processor.join().is_err() {
                log::error!("Processing thread panicked.");
            }
        }
    }
}

#[derive(Debug)]
pub enum ReplicaError {
    Pipeline(PipelineError),
    ObjectManager(ObjectManagerError),
}

impl From<PipelineError> for ReplicaError {
    fn from(value: PipelineError) -> Self {
        ReplicaError::Pipeline(value)
    }
}

impl From<ObjectManagerError> for ReplicaError {
    fn from(value: ObjectManagerError) -> Self {
        ReplicaError::ObjectManager(value)
    }
}
