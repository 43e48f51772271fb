/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Merges several feeds into a single, causally ordered stream of blocks.

use std::{
    collections::BTreeMap,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{
    feeds::{messages::FeedBlock, pluggables::Feed},
    types::{
        data_types::{FeedKey, SeqNumber, SubscriptionId},
        timeframe::Timeframe,
    },
};

use super::{message_selector::MessageSelector, timeframe_clock::start_after};

/// Called with the number of feeds in the iterator when the iterator stalls.
pub(crate) type StallHandler = Box<dyn Fn(usize) + Send + Sync>;

/// Blocking iterator over the blocks of a growing set of feeds.
///
/// Every feed has a cursor pointing at its next undelivered block. [`next_block`](Self::next_block)
/// offers the blocks under the cursors to a [`MessageSelector`] and delivers the one it picks, or
/// blocks until a feed grows, a feed is added, or the iterator is closed.
///
/// ## Stalls
///
/// If undelivered blocks exist but none of them can be delivered for `stall_timeout`, the iterator
/// calls its stall handler. The handler is called once per continuous period of not being ready. Feeds
/// that are simply caught up never cause a stall.
pub struct FeedSetIterator<F: Feed> {
    shared: Arc<Shared<F>>,
    selector: MessageSelector,
    /// Position of the first block to deliver from each feed. Feeds missing here start at 0.
    start: BTreeMap<FeedKey, SeqNumber>,
    stall_timeout: Duration,
    on_stall: StallHandler,
}

struct Shared<F> {
    state: Mutex<IteratorState<F>>,
    changed: Condvar,
}

struct IteratorState<F> {
    cursors: Vec<FeedCursor<F>>,
    closed: bool,
    not_ready_since: Option<Instant>,
    stall_reported: bool,
}

struct FeedCursor<F> {
    feed: F,
    next: SeqNumber,
    subscription: SubscriptionId,
}

impl<F: Feed> FeedSetIterator<F> {
    /// Create an iterator that, for every feed added to it, delivers the blocks after those accounted
    /// for in `start`.
    pub(crate) fn new(
        selector: MessageSelector,
        start: Timeframe,
        stall_timeout: Duration,
        on_stall: StallHandler,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(IteratorState {
                    cursors: Vec::new(),
                    closed: false,
                    not_ready_since: None,
                    stall_reported: false,
                }),
                changed: Condvar::new(),
            }),
            selector,
            start: start_after(&start).into_iter().collect(),
            stall_timeout,
            on_stall,
        }
    }

    /// Start delivering blocks from `feed`. Adding a feed twice, or adding a feed to a closed iterator,
    /// has no effect.
    pub fn add_feed(&self, feed: F) {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed || state.cursors.iter().any(|cursor| cursor.feed.key() == feed.key()) {
            return;
        }

        let next = self
            .start
            .get(&feed.key())
            .copied()
            .unwrap_or(SeqNumber::init());
        feed.download(next);

        let shared = Arc::downgrade(&self.shared);
        let subscription = feed.subscribe(move |_| {
            if let Some(shared) = shared.upgrade() {
                // Lock so that a waiter between checking the feeds and waiting cannot miss this.
                let _state = shared.state.lock().unwrap();
                shared.changed.notify_all();
            }
        });

        log::debug!("Adding feed {:?} to iterator, starting at {}.", feed.key(), next);
        state.cursors.push(FeedCursor {
            feed,
            next,
            subscription,
        });
        self.shared.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().unwrap().closed
    }

    /// Stop delivering blocks. Wakes up every thread blocked in [`next_block`](Self::next_block).
    pub fn close(&self) {
        let cursors = {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.cursors)
        };
        for cursor in cursors {
            cursor.feed.unsubscribe(cursor.subscription);
        }
        self.shared.changed.notify_all();
    }

    /// Block until the next block can be delivered, and return it. Returns `None` once the iterator is
    /// closed.
    pub fn next_block(&self) -> Option<FeedBlock> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }

            let mut candidates: Vec<(usize, FeedBlock)> = state
                .cursors
                .iter()
                .enumerate()
                .filter_map(|(index, cursor)| cursor.feed.get(cursor.next).map(|block| (index, block)))
                .collect();

            if let Some(selected) = self.selector.select(candidates.iter().map(|(_, block)| block)) {
                let (cursor, block) = candidates.swap_remove(selected);
                state.cursors[cursor].next = block.seq + 1;
                state.not_ready_since = None;
                state.stall_reported = false;
                return Some(block);
            }

            if candidates.is_empty() {
                state.not_ready_since = None;
                state.stall_reported = false;
                state = self.shared.changed.wait(state).unwrap();
                continue;
            }

            if state.stall_reported {
                state = self.shared.changed.wait(state).unwrap();
                continue;
            }

            let now = Instant::now();
            let elapsed = now - *state.not_ready_since.get_or_insert(now);
            if elapsed >= self.stall_timeout {
                state.stall_reported = true;
                let feeds = state.cursors.len();
                drop(state);
                (self.on_stall)(feeds);
                state = self.shared.state.lock().unwrap();
                continue;
            }

            state = self
                .shared
                .changed
                .wait_timeout(state, self.stall_timeout - elapsed)
                .unwrap()
                .0;
        }
    }
}

impl<F: Feed> Drop for FeedSetIterator<F> {
    fn drop(&mut self) {
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use crate::{
        feeds::{
            memory::{MemoryFeed, MemoryFeedStore},
            messages::FeedMessage,
        },
        pipeline::timeframe_clock::TimeframeClock,
    };

    use super::*;

    fn key(byte: u8) -> FeedKey {
        FeedKey::new([byte; 32])
    }

    fn iterator(
        clock: &Arc<TimeframeClock>,
        start: Timeframe,
        stall_timeout: Duration,
        stalls: Arc<AtomicUsize>,
    ) -> FeedSetIterator<MemoryFeed> {
        FeedSetIterator::new(
            MessageSelector::new(clock.clone()),
            start,
            stall_timeout,
            Box::new(move |_| {
                stalls.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn consume(clock: &TimeframeClock, iterator: &FeedSetIterator<MemoryFeed>) -> FeedBlock {
        let block = iterator.next_block().unwrap();
        clock.update_pending_timeframe(block.feed_key, block.seq);
        clock.update_timeframe();
        block
    }

    #[test]
    fn delivers_dependencies_first() {
        let store = MemoryFeedStore::new();
        let (a, b) = (store.open_feed(key(1), true), store.open_feed(key(2), true));
        let a0 = a.append(FeedMessage::new(Timeframe::new(), vec![0])).unwrap();
        b.append(FeedMessage::new(
            Timeframe::from_frames([(a0.feed_key, a0.seq)]),
            vec![1],
        ))
        .unwrap();

        let clock = Arc::new(TimeframeClock::new(Timeframe::new()));
        let iterator = iterator(&clock, Timeframe::new(), Duration::from_secs(10), Arc::default());
        // `b` is offered first, but depends on `a`.
        iterator.add_feed(b.clone());
        iterator.add_feed(a.clone());

        assert_eq!(consume(&clock, &iterator).feed_key, key(1));
        assert_eq!(consume(&clock, &iterator).feed_key, key(2));
    }

    #[test]
    fn starts_after_the_start_timeframe() {
        let store = MemoryFeedStore::new();
        let a = store.open_feed(key(1), true);
        for payload in 0..3 {
            a.append(FeedMessage::new(Timeframe::new(), vec![payload])).unwrap();
        }

        let start = Timeframe::from_frames([(key(1), SeqNumber::new(1))]);
        let clock = Arc::new(TimeframeClock::new(start.clone()));
        let iterator = iterator(&clock, start, Duration::from_secs(10), Arc::default());
        iterator.add_feed(a);

        assert_eq!(consume(&clock, &iterator).seq, SeqNumber::new(2));
    }

    #[test]
    fn wakes_up_on_append_and_close() {
        let store = MemoryFeedStore::new();
        let a = store.open_feed(key(1), true);
        let clock = Arc::new(TimeframeClock::new(Timeframe::new()));
        let iterator = Arc::new(iterator(
            &clock,
            Timeframe::new(),
            Duration::from_secs(10),
            Arc::default(),
        ));
        iterator.add_feed(a.clone());

        let iterator_clone = iterator.clone();
        let reader = thread::spawn(move || {
            let first = iterator_clone.next_block();
            let second = iterator_clone.next_block();
            (first, second)
        });

        thread::sleep(Duration::from_millis(20));
        a.append(FeedMessage::new(Timeframe::new(), vec![0])).unwrap();
        thread::sleep(Duration::from_millis(20));
        iterator.close();

        let (first, second) = reader.join().unwrap();
        assert_eq!(first.unwrap().seq, SeqNumber::new(0));
        assert!(second.is_none());
        assert!(iterator.is_closed());
    }

    #[test]
    fn stalls_once_on_a_missing_dependency() {
        let store = MemoryFeedStore::new();
        let b = store.open_feed(key(2), true);
        b.append(FeedMessage::new(
            Timeframe::from_frames([(key(1), SeqNumber::new(0))]),
            vec![0],
        ))
        .unwrap();

        let clock = Arc::new(TimeframeClock::new(Timeframe::new()));
        let stalls = Arc::new(AtomicUsize::new(0));
        let iterator = Arc::new(iterator(
            &clock,
            Timeframe::new(),
            Duration::from_millis(20),
            stalls.clone(),
        ));
        iterator.add_feed(b);

        let iterator_clone = iterator.clone();
        let reader = thread::spawn(move || iterator_clone.next_block());

        thread::sleep(Duration::from_millis(150));
        iterator.close();

        assert!(reader.join().unwrap().is_none());
        assert_eq!(stalls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn caught_up_feeds_never_stall() {
        let store = MemoryFeedStore::new();
        let a = store.open_feed(key(1), true);
        let clock = Arc::new(TimeframeClock::new(Timeframe::new()));
        let stalls = Arc::new(AtomicUsize::new(0));
        let iterator = Arc::new(iterator(
            &clock,
            Timeframe::new(),
            Duration::from_millis(10),
            stalls.clone(),
        ));
        iterator.add_feed(a);

        let iterator_clone = iterator.clone();
        let reader = thread::spawn(move || iterator_clone.next_block());
        thread::sleep(Duration::from_millis(60));
        iterator.close();

        assert!(reader.join().unwrap().is_none());
        assert_eq!(stalls.load(Ordering::SeqCst), 0);
    }
}
