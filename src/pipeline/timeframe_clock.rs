/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tracks how far a single consumer has processed a set of feeds.
//!
//! A [`TimeframeClock`] keeps two timeframes:
//! 1. The **pending** timeframe includes the message currently being processed.
//! 2. The **processed** timeframe (just "the timeframe") only includes messages whose processing has
//!    completed.
//!
//! The pipeline merges every message it hands out into the pending timeframe, and commits pending to
//! processed once the consumer comes back for the next message. Callers can block until the processed
//! timeframe reaches a target with [`wait_until_reached`](TimeframeClock::wait_until_reached).
//!
//! The clock also remembers whether the pipeline is stalled. The flag is raised by the pipeline's stall
//! handler and lowered as soon as another message is handed out, so waits that start during a stall
//! can give up straight away.

use std::{
    sync::{Condvar, Mutex},
    time::Instant,
};

use crate::{
    event_bus::Subscribers,
    types::{
        data_types::{FeedKey, SeqNumber, SubscriptionId},
        timeframe::Timeframe,
    },
};

/// How a wait on a [`TimeframeClock`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The processed timeframe caught up to the target.
    Reached,
    /// The pipeline stalled while waiting.
    Stalled,
    /// The deadline passed first.
    TimedOut,
}

struct ClockState {
    timeframe: Timeframe,
    pending_timeframe: Timeframe,
    stalled: bool,
}

pub struct TimeframeClock {
    state: Mutex<ClockState>,
    changed: Condvar,
    update: Subscribers<Timeframe>,
}

impl TimeframeClock {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            state: Mutex::new(ClockState {
                pending_timeframe: timeframe.clone(),
                timeframe,
                stalled: false,
            }),
            changed: Condvar::new(),
            update: Subscribers::new(),
        }
    }

    /// Get the timeframe of messages whose processing has completed.
    pub fn timeframe(&self) -> Timeframe {
        self.state.lock().unwrap().timeframe.clone()
    }

    /// Get the timeframe of messages handed out for processing, including one still being processed.
    pub fn pending_timeframe(&self) -> Timeframe {
        self.state.lock().unwrap().pending_timeframe.clone()
    }

    /// Account for message `seq` of `feed` in the pending timeframe. Handing out a message ends a
    /// stall.
    pub fn update_pending_timeframe(&self, feed: FeedKey, seq: SeqNumber) {
        let mut state = self.state.lock().unwrap();
        state.pending_timeframe.advance(feed, seq);
        state.stalled = false;
    }

    /// Commit the pending timeframe, wake every waiter, and notify subscribers. Returns the new
    /// processed timeframe.
    pub fn update_timeframe(&self) -> Timeframe {
        let timeframe = {
            let mut state = self.state.lock().unwrap();
            state.timeframe = state.pending_timeframe.clone();
            state.timeframe.clone()
        };
        self.changed.notify_all();
        self.update.emit(&timeframe);
        timeframe
    }

    /// Overwrite both timeframes, e.g., when the consumer's cursor is moved.
    pub fn set_timeframe(&self, timeframe: Timeframe) {
        {
            let mut state = self.state.lock().unwrap();
            state.pending_timeframe = timeframe.clone();
            state.timeframe = timeframe.clone();
            state.stalled = false;
        }
        self.changed.notify_all();
        self.update.emit(&timeframe);
    }

    /// Get whether `timeframe` depends on any message that has not been processed yet.
    pub fn has_gaps(&self, timeframe: &Timeframe) -> bool {
        !Timeframe::dependencies(timeframe, &self.state.lock().unwrap().timeframe).is_empty()
    }

    /// Register `callback` to be called with the processed timeframe every time it changes.
    pub fn subscribe(&self, callback: impl Fn(&Timeframe) + Send + Sync + 'static) -> SubscriptionId {
        self.update.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.update.unsubscribe(subscription)
    }

    /// Get whether the pipeline stalled and has not handed out a message since.
    pub fn is_stalled(&self) -> bool {
        self.state.lock().unwrap().stalled
    }

    /// Raise the stall flag and wake waiters that break on stalls.
    pub(crate) fn mark_stalled(&self) {
        self.state.lock().unwrap().stalled = true;
        self.changed.notify_all();
    }

    pub(crate) fn clear_stalled(&self) {
        self.state.lock().unwrap().stalled = false;
    }

    /// Block until the processed timeframe has no dependencies on `target`.
    ///
    /// Returns early with [`WaitOutcome::TimedOut`] once `deadline` passes, and with
    /// [`WaitOutcome::Stalled`] if `break_on_stall` is set and the clock is
    /// [stalled](Self::is_stalled), whether the stall began before or during the wait.
    pub fn wait_until_reached(
        &self,
        target: &Timeframe,
        deadline: Option<Instant>,
        break_on_stall: bool,
    ) -> WaitOutcome {
        let mut state = self.state.lock().unwrap();
        loop {
            if Timeframe::dependencies(target, &state.timeframe).is_empty() {
                return WaitOutcome::Reached;
            }
            if break_on_stall && state.stalled {
                return WaitOutcome::Stalled;
            }
            state = match deadline {
                None => self.changed.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    self.changed.wait_timeout(state, deadline - now).unwrap().0
                }
            };
        }
    }
}

/// Map a processed timeframe to the position of the first unprocessed message of each of its feeds.
/// Feeds missing from `timeframe` start from their first message.
pub fn start_after(timeframe: &Timeframe) -> Vec<(FeedKey, SeqNumber)> {
    timeframe.frames().map(|(feed, seq)| (*feed, *seq + 1)).collect()
}

/// Map the lengths of feeds to the timeframe that accounts for every message in them. Empty feeds are
/// left out.
pub fn map_feed_indexes_to_timeframe(lengths: impl IntoIterator<Item = (FeedKey, u64)>) -> Timeframe {
    lengths
        .into_iter()
        .filter(|(_, length)| *length > 0)
        .map(|(feed, length)| (feed, SeqNumber::new(length - 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    fn key(byte: u8) -> FeedKey {
        FeedKey::new([byte; 32])
    }

    #[test]
    fn pending_timeframe_is_committed_by_update() {
        let clock = TimeframeClock::new(Timeframe::new());
        let updates = Arc::new(AtomicUsize::new(0));
        let updates_clone = updates.clone();
        clock.subscribe(move |_| {
            updates_clone.fetch_add(1, Ordering::SeqCst);
        });

        clock.update_pending_timeframe(key(1), SeqNumber::new(0));
        assert!(clock.timeframe().is_empty());
        assert_eq!(clock.pending_timeframe().get(&key(1)), Some(SeqNumber::new(0)));
        assert!(clock.has_gaps(&Timeframe::from_frames([(key(1), SeqNumber::new(0))])));

        clock.update_timeframe();
        assert_eq!(clock.timeframe().get(&key(1)), Some(SeqNumber::new(0)));
        assert!(!clock.has_gaps(&Timeframe::from_frames([(key(1), SeqNumber::new(0))])));
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_until_reached_wakes_on_commit() {
        let clock = Arc::new(TimeframeClock::new(Timeframe::new()));
        let target = Timeframe::from_frames([(key(1), SeqNumber::new(1))]);

        let clock_clone = clock.clone();
        let committer = thread::spawn(move || {
            for seq in 0..2 {
                thread::sleep(Duration::from_millis(10));
                clock_clone.update_pending_timeframe(key(1), SeqNumber::new(seq));
                clock_clone.update_timeframe();
            }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(
            clock.wait_until_reached(&target, Some(deadline), false),
            WaitOutcome::Reached
        );
        committer.join().unwrap();
    }

    #[test]
    fn wait_until_reached_times_out_or_breaks_on_stall() {
        let clock = Arc::new(TimeframeClock::new(Timeframe::new()));
        let target = Timeframe::from_frames([(key(1), SeqNumber::new(0))]);

        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(
            clock.wait_until_reached(&target, Some(deadline), true),
            WaitOutcome::TimedOut
        );

        let clock_clone = clock.clone();
        let staller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            clock_clone.mark_stalled();
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(
            clock.wait_until_reached(&target, Some(deadline), true),
            WaitOutcome::Stalled
        );
        staller.join().unwrap();
    }

    #[test]
    fn waits_started_during_a_stall_break_immediately() {
        let clock = TimeframeClock::new(Timeframe::new());
        let target = Timeframe::from_frames([(key(2), SeqNumber::new(0))]);
        clock.mark_stalled();
        assert!(clock.is_stalled());

        // No deadline: a wait that missed the stall would block forever.
        assert_eq!(clock.wait_until_reached(&target, None, true), WaitOutcome::Stalled);
        assert_eq!(clock.wait_until_reached(&target, None, true), WaitOutcome::Stalled);

        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(
            clock.wait_until_reached(&target, Some(deadline), false),
            WaitOutcome::TimedOut
        );

        clock.update_pending_timeframe(key(1), SeqNumber::new(0));
        assert!(!clock.is_stalled());
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(
            clock.wait_until_reached(&target, Some(deadline), true),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn start_positions_follow_the_processed_timeframe() {
        let timeframe = Timeframe::from_frames([(key(1), SeqNumber::new(3)), (key(2), SeqNumber::new(0))]);
        assert_eq!(
            start_after(&timeframe),
            vec![(key(1), SeqNumber::new(4)), (key(2), SeqNumber::new(1))]
        );
        assert_eq!(
            map_feed_indexes_to_timeframe([(key(1), 4), (key(2), 1), (key(3), 0)]),
            timeframe
        );
    }
}
