/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reads many feeds as one causally ordered stream, and writes to at most one.
//!
//! # Lifecycle
//!
//! A [`Pipeline`] goes through the states `idle → started → (paused ⇄ running) → stopped`. The
//! lifecycle operations [`start`](Pipeline::start), [`stop`](Pipeline::stop),
//! [`set_cursor`](Pipeline::set_cursor), [`pause`](Pipeline::pause), and
//! [`unpause`](Pipeline::unpause) are mutually exclusive: each one waits for any other lifecycle
//! operation in progress to finish before it runs.
//!
//! # Consuming
//!
//! [`consume`](Pipeline::consume) returns the pipeline's only [`PipelineConsumer`], an [`Iterator`]
//! over [`FeedBlock`]s. For every block it hands out, the consumer:
//! 1. Marks the pipeline as processing and merges the block into the
//!    [pending timeframe](TimeframeClock::pending_timeframe).
//! 2. Returns the block to the caller.
//! 3. When the caller comes back for the next block (or drops the consumer), commits the pending
//!    timeframe to the processed timeframe and publishes an
//!    [`UpdateTimeframeEvent`](crate::events::UpdateTimeframeEvent).
//!
//! So the [processed timeframe](state::PipelineState::timeframe) only ever includes blocks that the
//! caller has finished handling. A caller that fails to handle a block calls
//! [`abort`](PipelineConsumer::abort) instead, which ends consumption without committing it. [`stop`](Pipeline::stop) and [`pause`](Pipeline::pause) wait for the
//! block being handled to be finished, so calling either from the thread that is handling a block
//! deadlocks.
//!
//! # Writing
//!
//! Once a writable feed is designated with [`set_write_feed`](Pipeline::set_write_feed),
//! [`writer`](Pipeline::writer) returns a [`PipelineWriter`] that stamps every payload with the
//! processed timeframe at the time of writing.

pub mod feed_set_iterator;

pub mod message_selector;

pub mod state;

pub mod timeframe_clock;

pub mod trigger;

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use typed_builder::TypedBuilder;

use crate::{
    events::{ConsumeMessageEvent, Event, EventPublisher, StallEvent, UpdateTimeframeEvent},
    event_bus::Subscribers,
    feeds::{
        messages::{FeedBlock, FeedMessage, FeedReceipt},
        pluggables::{Feed, FeedError},
        writer::FeedWriter,
    },
    types::{data_types::FeedKey, timeframe::Timeframe},
};

use self::{
    feed_set_iterator::FeedSetIterator, message_selector::MessageSelector, state::PipelineState,
    timeframe_clock::TimeframeClock,
};

/// Parameters of a [`Pipeline`].
#[derive(Clone, Debug, TypedBuilder)]
pub struct PipelineConfiguration {
    #[builder(default = Duration::from_millis(1000), setter(doc = "Set how long no block may be deliverable before the pipeline reports a stall. Optional, defaults to 1 second."))]
    pub stall_timeout: Duration,
    #[builder(default = false, setter(doc = "Enable logging of the pipeline's events? Optional, defaults to false."))]
    pub log_events: bool,
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A multi-reader pipeline over feeds, with at most one writable feed.
///
/// Cloning a `Pipeline` creates another handle to the same pipeline.
pub struct Pipeline<F: Feed> {
    inner: Arc<PipelineInner<F>>,
}

impl<F: Feed> Clone for Pipeline<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct PipelineInner<F: Feed> {
    pub(crate) configuration: PipelineConfiguration,
    pub(crate) event_publisher: EventPublisher,
    pub(crate) clock: Arc<TimeframeClock>,
    pub(crate) stalled: Arc<Subscribers<StallEvent>>,
    lifecycle: Mutex<()>,
    pub(crate) state: Mutex<ProcessingState<F>>,
    changed: Condvar,
}

pub(crate) struct ProcessingState<F: Feed> {
    pub(crate) feeds: Vec<F>,
    writer: Option<F>,
    pub(crate) start_timeframe: Timeframe,
    pub(crate) target_timeframe: Option<Timeframe>,
    iterator: Option<Arc<FeedSetIterator<F>>>,
    /// Incremented every time `iterator` is replaced.
    iterator_epoch: u64,
    /// Incremented by every `stop`. Consumers end when it changes.
    stop_epoch: u64,
    is_started: bool,
    is_stopping: bool,
    is_paused: bool,
    is_consuming: bool,
    processing: bool,
}

impl<F: Feed> Pipeline<F> {
    /// Create an idle pipeline with no feeds, whose processed timeframe is empty.
    pub fn new(configuration: PipelineConfiguration, event_publisher: EventPublisher) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                configuration,
                event_publisher,
                clock: Arc::new(TimeframeClock::new(Timeframe::new())),
                stalled: Arc::new(Subscribers::new()),
                lifecycle: Mutex::new(()),
                state: Mutex::new(ProcessingState {
                    feeds: Vec::new(),
                    writer: None,
                    start_timeframe: Timeframe::new(),
                    target_timeframe: None,
                    iterator: None,
                    iterator_epoch: 0,
                    stop_epoch: 0,
                    is_started: false,
                    is_stopping: false,
                    is_paused: false,
                    is_consuming: false,
                    processing: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Get an accessor for the pipeline's timeframes and feeds.
    pub fn state(&self) -> PipelineState<F> {
        PipelineState::new(self.inner.clone())
    }

    /// Get the pipeline's timeframe clock.
    pub fn timeframe_clock(&self) -> Arc<TimeframeClock> {
        self.inner.clock.clone()
    }

    /// Register `feed` as a source of blocks. If the pipeline has been started, blocks from `feed` are
    /// delivered from now on, starting after the cursor. Adding a feed twice has no effect.
    ///
    /// This is not a lifecycle operation, so it may be called while a block is being handled.
    pub fn add_feed(&self, feed: F) {
        let iterator = {
            let mut state = self.inner.lock_state();
            if state.feeds.iter().any(|added| added.key() == feed.key()) {
                return;
            }
            log::debug!("Adding feed {:?}.", feed.key());
            state.feeds.push(feed.clone());
            state.iterator.clone()
        };
        if let Some(iterator) = iterator {
            iterator.add_feed(feed);
        }
    }

    pub fn has_feed(&self, feed_key: &FeedKey) -> bool {
        self.inner
            .lock_state()
            .feeds
            .iter()
            .any(|feed| feed.key() == *feed_key)
    }

    /// Designate `feed` as the pipeline's output. `feed` must already have been
    /// [added](Self::add_feed), must be writable, and no write feed may have been set before.
    pub fn set_write_feed(&self, feed: F) -> Result<(), PipelineError> {
        let mut state = self.inner.lock_state();
        if state.writer.is_some() {
            return Err(PipelineError::WriterAlreadySet);
        }
        if !feed.writable() {
            return Err(PipelineError::FeedNotWritable { feed: feed.key() });
        }
        if !state.feeds.iter().any(|added| added.key() == feed.key()) {
            return Err(PipelineError::FeedNotFound { feed: feed.key() });
        }
        log::debug!("Setting write feed {:?}.", feed.key());
        state.writer = Some(feed);
        Ok(())
    }

    /// Get a writer that appends payloads to the write feed.
    pub fn writer(&self) -> Result<PipelineWriter<F>, PipelineError> {
        let state = self.inner.lock_state();
        let feed = state.writer.clone().ok_or(PipelineError::WriterNotSet)?;
        Ok(PipelineWriter {
            feed,
            clock: self.inner.clock.clone(),
        })
    }

    /// Open the merge iterator over every added feed, starting after the processed timeframe.
    pub fn start(&self) -> Result<(), PipelineError> {
        let _lifecycle = self.inner.lifecycle.lock().unwrap();
        log::debug!("Starting pipeline.");
        let mut state = self.inner.lock_state();
        if state.is_started {
            return Err(PipelineError::InvalidState { operation: "start" });
        }
        self.inner.init_iterator(&mut state);
        state.is_started = true;
        drop(state);
        self.inner.changed.notify_all();
        log::info!("Started pipeline with timeframe {}.", self.inner.clock.timeframe());
        Ok(())
    }

    /// Close the merge iterator, wait for the block being handled (if any) to be finished, and reset
    /// the pipeline so that it may be started again. The active consumer, if any, ends.
    pub fn stop(&self) -> Result<(), PipelineError> {
        let _lifecycle = self.inner.lifecycle.lock().unwrap();
        log::debug!("Stopping pipeline.");
        let mut state = self.inner.lock_state();
        state.is_stopping = true;
        state.stop_epoch += 1;
        if let Some(iterator) = state.iterator.take() {
            iterator.close();
        }
        self.inner.changed.notify_all();
        while state.processing {
            state = self.inner.changed.wait(state).unwrap();
        }
        state.is_started = false;
        state.is_paused = false;
        state.is_stopping = false;
        drop(state);
        self.inner.changed.notify_all();
        log::info!("Stopped pipeline at timeframe {}.", self.inner.clock.timeframe());
        Ok(())
    }

    /// Move the cursor: blocks accounted for in `timeframe` are considered processed, and delivery
    /// continues strictly after them. Only allowed before [`start`](Self::start) or while
    /// [paused](Self::pause), and every feed in `timeframe` must have been added.
    pub fn set_cursor(&self, timeframe: Timeframe) -> Result<(), PipelineError> {
        let _lifecycle = self.inner.lifecycle.lock().unwrap();
        {
            let mut state = self.inner.lock_state();
            if state.is_started && !state.is_paused {
                return Err(PipelineError::InvalidState {
                    operation: "set_cursor",
                });
            }
            for (feed_key, seq) in timeframe.frames() {
                let feed = state
                    .feeds
                    .iter()
                    .find(|feed| feed.key() == *feed_key)
                    .ok_or(PipelineError::FeedNotFound { feed: *feed_key })?;
                feed.download(*seq + 1);
            }
            log::debug!("Setting cursor to {}.", timeframe);
            state.start_timeframe = timeframe.clone();
        }

        // Clock subscribers may read the pipeline's state.
        self.inner.clock.set_timeframe(timeframe);

        let mut state = self.inner.lock_state();
        if let Some(iterator) = state.iterator.take() {
            iterator.close();
            self.inner.init_iterator(&mut state);
        }
        drop(state);
        self.inner.changed.notify_all();
        Ok(())
    }

    /// Stop handing out blocks, and wait for the block being handled (if any) to be finished.
    pub fn pause(&self) -> Result<(), PipelineError> {
        let _lifecycle = self.inner.lifecycle.lock().unwrap();
        let mut state = self.inner.lock_state();
        if !state.is_started {
            return Err(PipelineError::InvalidState { operation: "pause" });
        }
        if state.is_paused {
            return Ok(());
        }
        state.is_paused = true;
        while state.processing {
            state = self.inner.changed.wait(state).unwrap();
        }
        log::debug!("Paused pipeline.");
        Ok(())
    }

    pub fn unpause(&self) -> Result<(), PipelineError> {
        let _lifecycle = self.inner.lifecycle.lock().unwrap();
        let mut state = self.inner.lock_state();
        if !state.is_started || !state.is_paused {
            return Err(PipelineError::InvalidState {
                operation: "unpause",
            });
        }
        state.is_paused = false;
        drop(state);
        self.inner.changed.notify_all();
        log::debug!("Unpaused pipeline.");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock_state().is_started
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock_state().is_paused
    }

    /// Get the pipeline's consumer. The pipeline must have been [started](Self::start), and only one
    /// consumer may be alive at a time.
    pub fn consume(&self) -> Result<PipelineConsumer<F>, PipelineError> {
        let mut state = self.inner.lock_state();
        if state.is_consuming {
            return Err(PipelineError::AlreadyConsuming);
        }
        if state.iterator.is_none() {
            return Err(PipelineError::IteratorNotInitialized);
        }
        state.is_consuming = true;
        Ok(PipelineConsumer {
            inner: self.inner.clone(),
            stop_epoch: state.stop_epoch,
            in_flight: false,
            done: false,
        })
    }
}

impl<F: Feed> PipelineInner<F> {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ProcessingState<F>> {
        self.state.lock().unwrap()
    }

    /// Replace the iterator with a fresh one over every added feed, starting after the processed
    /// timeframe.
    fn init_iterator(&self, state: &mut ProcessingState<F>) {
        self.clock.clear_stalled();
        let clock = self.clock.clone();
        let stalled = self.stalled.clone();
        let event_publisher = self.event_publisher.clone();
        let stall_timeout = self.configuration.stall_timeout;
        let on_stall = Box::new(move |feeds: usize| {
            let timeframe = clock.timeframe();
            log::warn!(
                "Stalled after {}ms with {} feeds at timeframe {}.",
                stall_timeout.as_millis(),
                feeds,
                timeframe
            );
            let stall_event = StallEvent {
                timestamp: SystemTime::now(),
                feeds,
                stall_timeout,
                timeframe,
            };
            stalled.emit(&stall_event);
            Event::publish(&event_publisher, Event::Stall(stall_event));
            clock.mark_stalled();
        });

        let iterator = Arc::new(FeedSetIterator::new(
            MessageSelector::new(self.clock.clone()),
            self.clock.timeframe(),
            stall_timeout,
            on_stall,
        ));
        for feed in state.feeds.iter() {
            iterator.add_feed(feed.clone());
        }
        state.iterator = Some(iterator);
        state.iterator_epoch += 1;
    }
}

/// The only consumer of a [`Pipeline`]. See the [module-level docs](self#consuming).
///
/// Iteration ends once the pipeline is [stopped](Pipeline::stop). A consumer cannot be restarted.
pub struct PipelineConsumer<F: Feed> {
    inner: Arc<PipelineInner<F>>,
    stop_epoch: u64,
    in_flight: bool,
    done: bool,
}

impl<F: Feed> PipelineConsumer<F> {
    /// Mark the block handed out last as processed.
    fn commit(&mut self) {
        if !self.in_flight {
            return;
        }
        self.in_flight = false;

        // Advance before clearing `processing`, so that pausing implies an up-to-date timeframe.
        let timeframe = self.inner.clock.update_timeframe();
        self.inner.lock_state().processing = false;
        self.inner.changed.notify_all();

        Event::publish(
            &self.inner.event_publisher,
            Event::UpdateTimeframe(UpdateTimeframeEvent {
                timestamp: SystemTime::now(),
                timeframe,
            }),
        );
    }

    /// End consumption without committing the block handed out last. The block stays in the pending
    /// timeframe but never reaches the processed timeframe.
    pub fn abort(mut self) {
        if self.in_flight {
            self.in_flight = false;
            log::warn!(
                "Aborted consumer: processed timeframe stays at {}.",
                self.inner.clock.timeframe()
            );
            self.inner.lock_state().processing = false;
            self.inner.changed.notify_all();
        }
    }

    /// Wait until there is a live iterator to read from and the pipeline is not paused. Returns `None`
    /// if the pipeline was stopped.
    fn wait_for_iterator(&self) -> Option<(Arc<FeedSetIterator<F>>, u64)> {
        let mut state = self.inner.lock_state();
        loop {
            if state.stop_epoch != self.stop_epoch {
                return None;
            }
            if !state.is_paused {
                if let Some(iterator) = state.iterator.as_ref().filter(|iterator| !iterator.is_closed()) {
                    return Some((iterator.clone(), state.iterator_epoch));
                }
            }
            state = self.inner.changed.wait(state).unwrap();
        }
    }
}

impl<F: Feed> Iterator for PipelineConsumer<F> {
    type Item = FeedBlock;

    fn next(&mut self) -> Option<FeedBlock> {
        self.commit();
        if self.done {
            return None;
        }

        loop {
            let Some((iterator, iterator_epoch)) = self.wait_for_iterator() else {
                self.done = true;
                return None;
            };

            // Closed iterators return None: the cursor was moved, or the pipeline is stopping.
            let Some(block) = iterator.next_block() else {
                continue;
            };

            let mut state = self.inner.lock_state();
            while state.is_paused && state.stop_epoch == self.stop_epoch {
                state = self.inner.changed.wait(state).unwrap();
            }
            if state.stop_epoch != self.stop_epoch {
                self.done = true;
                return None;
            }
            if state.iterator_epoch != iterator_epoch {
                // Read before the cursor moved.
                continue;
            }
            state.processing = true;
            drop(state);

            self.inner
                .clock
                .update_pending_timeframe(block.feed_key, block.seq);
            self.in_flight = true;
            Event::publish(
                &self.inner.event_publisher,
                Event::ConsumeMessage(ConsumeMessageEvent {
                    timestamp: SystemTime::now(),
                    feed_key: block.feed_key,
                    seq: block.seq,
                }),
            );
            return Some(block);
        }
    }
}

impl<F: Feed> Drop for PipelineConsumer<F> {
    fn drop(&mut self) {
        self.commit();
        self.inner.lock_state().is_consuming = false;
        self.inner.changed.notify_all();
    }
}

/// Appends payloads to the pipeline's write feed, stamped with the processed timeframe.
pub struct PipelineWriter<F: Feed> {
    feed: F,
    clock: Arc<TimeframeClock>,
}

impl<F: Feed> FeedWriter<Vec<u8>> for PipelineWriter<F> {
    fn feed_key(&self) -> FeedKey {
        self.feed.key()
    }

    fn write(&self, payload: Vec<u8>) -> Result<FeedReceipt, FeedError> {
        self.feed
            .append(FeedMessage::new(self.clock.timeframe(), payload))
    }
}

#[derive(Debug)]
pub enum PipelineError {
    WriterAlreadySet,
    FeedNotWritable { feed: FeedKey },
    FeedNotFound { feed: FeedKey },
    InvalidState { operation: &'static str },
    AlreadyConsuming,
    IteratorNotInitialized,
    WriterNotSet,
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Instant,
    };

    use crate::{
        feeds::memory::{MemoryFeed, MemoryFeedStore},
        types::data_types::SeqNumber,
    };

    use super::*;

    fn key(byte: u8) -> FeedKey {
        FeedKey::new([byte; 32])
    }

    fn pipeline() -> Pipeline<MemoryFeed> {
        Pipeline::new(PipelineConfiguration::default(), None)
    }

    #[test]
    fn write_feed_must_be_added_and_writable_and_unique() {
        let store = MemoryFeedStore::new();
        let pipeline = pipeline();
        let feed = store.open_feed(key(1), true);
        let read_only = store.open_feed(key(2), false);

        assert!(matches!(pipeline.writer(), Err(PipelineError::WriterNotSet)));
        assert!(matches!(
            pipeline.set_write_feed(feed.clone()),
            Err(PipelineError::FeedNotFound { .. })
        ));

        pipeline.add_feed(feed.clone());
        pipeline.add_feed(read_only.clone());
        assert!(matches!(
            pipeline.set_write_feed(read_only),
            Err(PipelineError::FeedNotWritable { .. })
        ));
        pipeline.set_write_feed(feed.clone()).unwrap();
        assert!(matches!(
            pipeline.set_write_feed(feed),
            Err(PipelineError::WriterAlreadySet)
        ));
        assert_eq!(pipeline.writer().unwrap().feed_key(), key(1));
    }

    #[test]
    fn lifecycle_operations_check_state() {
        let pipeline = pipeline();
        assert!(matches!(
            pipeline.consume(),
            Err(PipelineError::IteratorNotInitialized)
        ));
        assert!(matches!(
            pipeline.pause(),
            Err(PipelineError::InvalidState { operation: "pause" })
        ));

        pipeline.start().unwrap();
        assert!(matches!(
            pipeline.set_cursor(Timeframe::new()),
            Err(PipelineError::InvalidState { .. })
        ));

        let consumer = pipeline.consume().unwrap();
        assert!(matches!(
            pipeline.consume(),
            Err(PipelineError::AlreadyConsuming)
        ));
        drop(consumer);

        pipeline.pause().unwrap();
        pipeline.set_cursor(Timeframe::new()).unwrap();
        pipeline.unpause().unwrap();
        assert!(matches!(
            pipeline.unpause(),
            Err(PipelineError::InvalidState { .. })
        ));
        pipeline.stop().unwrap();
        assert!(!pipeline.is_started());
    }

    #[test]
    fn timeframe_only_reflects_blocks_after_they_are_handled() {
        let store = MemoryFeedStore::new();
        let feed = store.open_feed(key(1), true);
        let pipeline = pipeline();
        pipeline.add_feed(feed.clone());
        pipeline.set_write_feed(feed.clone()).unwrap();

        let writer = pipeline.writer().unwrap();
        writer.write(vec![0]).unwrap();
        writer.write(vec![1]).unwrap();

        pipeline.start().unwrap();
        let mut consumer = pipeline.consume().unwrap();

        let first = consumer.next().unwrap();
        assert_eq!(first.seq, SeqNumber::new(0));
        assert!(pipeline.state().timeframe().is_empty());
        assert_eq!(
            pipeline.state().pending_timeframe().get(&key(1)),
            Some(SeqNumber::new(0))
        );

        let second = consumer.next().unwrap();
        assert_eq!(second.seq, SeqNumber::new(1));
        assert_eq!(pipeline.state().timeframe().get(&key(1)), Some(SeqNumber::new(0)));

        drop(consumer);
        assert_eq!(pipeline.state().timeframe().get(&key(1)), Some(SeqNumber::new(1)));
        pipeline.stop().unwrap();
    }

    #[test]
    fn aborted_blocks_are_not_processed() {
        let store = MemoryFeedStore::new();
        let feed = store.open_feed(key(1), true);
        let pipeline = pipeline();
        pipeline.add_feed(feed.clone());
        pipeline.set_write_feed(feed).unwrap();
        pipeline.writer().unwrap().write(vec![0]).unwrap();

        pipeline.start().unwrap();
        let mut consumer = pipeline.consume().unwrap();
        assert_eq!(consumer.next().unwrap().seq, SeqNumber::new(0));
        consumer.abort();

        assert!(pipeline.state().timeframe().is_empty());
        assert_eq!(
            pipeline.state().pending_timeframe().get(&key(1)),
            Some(SeqNumber::new(0))
        );
        // Neither waits for the aborted block.
        pipeline.pause().unwrap();
        pipeline.stop().unwrap();
        assert!(pipeline.state().timeframe().is_empty());
    }

    #[test]
    fn waits_started_after_a_stall_break_immediately() {
        let store = MemoryFeedStore::new();
        let feed = store.open_feed(key(1), true);
        feed.append(FeedMessage::new(
            Timeframe::from_frames([(key(2), SeqNumber::new(0))]),
            vec![0],
        ))
        .unwrap();

        let pipeline = Pipeline::new(
            PipelineConfiguration::builder()
                .stall_timeout(Duration::from_millis(20))
                .build(),
            None,
        );
        let stalls = Arc::new(AtomicUsize::new(0));
        let stalls_clone = stalls.clone();
        pipeline.state().subscribe_stalled(move |_| {
            stalls_clone.fetch_add(1, Ordering::SeqCst);
        });
        pipeline.add_feed(feed);
        pipeline.start().unwrap();
        let mut consumer = pipeline.consume().unwrap();
        let reader = thread::spawn(move || consumer.next());

        let deadline = Instant::now() + Duration::from_secs(10);
        while stalls.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "The pipeline never stalled.");
            thread::sleep(Duration::from_millis(5));
        }

        // No timeout: missing the stall would block forever.
        let state = pipeline.state();
        state.set_target_timeframe(Timeframe::from_frames([(key(1), SeqNumber::new(0))]));
        let params = state::WaitUntilReachedParams::builder().build();
        assert_eq!(
            state.wait_until_reached_target_timeframe(params.clone()),
            timeframe_clock::WaitOutcome::Stalled
        );
        assert_eq!(
            state.wait_until_reached_target_timeframe(params),
            timeframe_clock::WaitOutcome::Stalled
        );

        pipeline.stop().unwrap();
        assert!(reader.join().unwrap().is_none());
    }

    #[test]
    fn stop_ends_a_blocked_consumer() {
        let store = MemoryFeedStore::new();
        let pipeline = pipeline();
        pipeline.add_feed(store.open_feed(key(1), true));
        pipeline.start().unwrap();

        let mut consumer = pipeline.consume().unwrap();
        let reader = thread::spawn(move || consumer.next());

        thread::sleep(Duration::from_millis(20));
        pipeline.stop().unwrap();
        assert!(reader.join().unwrap().is_none());

        // A fresh start gets a fresh consumer.
        pipeline.start().unwrap();
        assert!(pipeline.consume().is_ok());
    }
}
