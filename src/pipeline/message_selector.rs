/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Picks the next message to deliver out of the heads of several feeds.
//!
//! A message is safe to deliver once every message its declared timeframe depends on has been
//! processed. The selector offers candidates in a fixed order (the order the feeds were added to the
//! pipeline) and picks the first safe one. This only decides the order of the raw message stream,
//! which may differ between replicas; the order of mutations applied to objects is settled separately
//! by [`insertion_index`](crate::ordering::insertion_index).

use std::sync::Arc;

use crate::feeds::messages::FeedBlock;

use super::timeframe_clock::TimeframeClock;

pub struct MessageSelector {
    clock: Arc<TimeframeClock>,
}

impl MessageSelector {
    pub fn new(clock: Arc<TimeframeClock>) -> Self {
        Self { clock }
    }

    /// Get the index of the first candidate whose declared timeframe has no gaps against the clock's
    /// processed timeframe, or `None` if no candidate is ready.
    pub fn select<'a>(&self, candidates: impl IntoIterator<Item = &'a FeedBlock>) -> Option<usize> {
        candidates
            .into_iter()
            .position(|candidate| !self.clock.has_gaps(&candidate.data.timeframe))
    }
}
