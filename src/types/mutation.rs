/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Metadata attached to mutations as they flow from feeds into state machines.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    data_types::{FeedKey, SeqNumber},
    timeframe::Timeframe,
};

/// Where a confirmed mutation came from, and what its writer had processed when writing it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MutationMeta {
    /// Feed the mutation was appended to.
    pub feed_key: FeedKey,

    /// Position of the mutation's message in `feed_key`.
    pub seq: SeqNumber,

    /// Timeframe declared by the writer of the mutation.
    pub timeframe: Timeframe,
}

impl MutationMeta {
    /// Create a new `MutationMeta`.
    pub fn new(feed_key: FeedKey, seq: SeqNumber, timeframe: Timeframe) -> Self {
        Self {
            feed_key,
            seq,
            timeframe,
        }
    }

    /// Get the timeframe of everything this mutation is known to come after: its declared timeframe,
    /// merged with every earlier message of its own feed.
    pub fn effective_timeframe(&self) -> Timeframe {
        match self.seq.prev() {
            Some(prev) => Timeframe::merge(
                &self.timeframe,
                &Timeframe::from_frames([(self.feed_key, prev)]),
            ),
            None => self.timeframe.clone(),
        }
    }

    /// Get the [`ProcessMeta`] handed to state machines when this mutation is processed.
    pub fn process_meta(&self) -> ProcessMeta {
        ProcessMeta {
            author: self.feed_key,
        }
    }
}

impl AsRef<MutationMeta> for MutationMeta {
    fn as_ref(&self) -> &MutationMeta {
        self
    }
}

/// A confirmed mutation (still encoded) together with its [`MutationMeta`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MutationEntry {
    pub meta: MutationMeta,
    pub mutation: Vec<u8>,
}

impl AsRef<MutationMeta> for MutationEntry {
    fn as_ref(&self) -> &MutationMeta {
        &self.meta
    }
}

/// Information about the author of a mutation that state machines may use when processing it.
///
/// Optimistic and confirmed deliveries of the same mutation carry the same `ProcessMeta`, so that
/// processing is a deterministic function of the ordered mutation list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessMeta {
    /// Feed key of the peer that wrote the mutation.
    pub author: FeedKey,
}
