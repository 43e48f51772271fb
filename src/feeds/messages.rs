/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages stored in feeds, and the receipts returned when they are appended.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{FeedKey, SeqNumber},
    mutation::MutationMeta,
    timeframe::Timeframe,
};

/// A single entry of a feed, as written by the feed's owner.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeedMessage {
    /// Timeframe that the writer had processed when it wrote this message. The message causally
    /// depends on every message it accounts for.
    pub timeframe: Timeframe,

    /// Opaque, encoded payload.
    pub payload: Vec<u8>,
}

impl FeedMessage {
    pub fn new(timeframe: Timeframe, payload: Vec<u8>) -> Self {
        Self { timeframe, payload }
    }
}

/// A [`FeedMessage`] together with its position in the feed it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedBlock {
    pub feed_key: FeedKey,
    pub seq: SeqNumber,
    pub data: FeedMessage,
}

impl FeedBlock {
    /// Get the [`MutationMeta`] describing where this block came from and what it declared.
    pub fn mutation_meta(&self) -> MutationMeta {
        MutationMeta::new(self.feed_key, self.seq, self.data.timeframe.clone())
    }

    /// Get the receipt that was returned to the writer of this block.
    pub fn receipt(&self) -> FeedReceipt {
        FeedReceipt {
            feed_key: self.feed_key,
            seq: self.seq,
        }
    }
}

/// Proof of a completed append: the feed and the position the message was stored at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeedReceipt {
    pub feed_key: FeedKey,
    pub seq: SeqNumber,
}
