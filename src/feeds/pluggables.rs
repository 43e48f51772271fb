/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for pluggable feed storage.

use std::{io, ops::Range};

use crate::types::data_types::{FeedKey, SeqNumber, SubscriptionId};

use super::messages::{FeedBlock, FeedMessage, FeedReceipt};

/// An append-only log of [`FeedMessage`]s written by exactly one peer.
///
/// Handles to a feed are cheap to clone and all clones refer to the same log. Implementations must
/// let many readers read concurrently while the owner appends.
pub trait Feed: Clone + Send + Sync + 'static {
    /// Get the key identifying this feed.
    fn key(&self) -> FeedKey;

    /// Get the number of messages currently stored in this feed.
    fn length(&self) -> u64;

    /// Get whether this handle may [`append`](Feed::append) to the feed.
    fn writable(&self) -> bool;

    /// Get the block stored at `seq`, if the feed is at least `seq + 1` messages long.
    fn get(&self, seq: SeqNumber) -> Option<FeedBlock>;

    /// Get the blocks stored at positions in `range`. The result stops early at the end of the feed.
    fn read(&self, range: Range<u64>) -> Vec<FeedBlock> {
        range.map_while(|seq| self.get(SeqNumber::new(seq))).collect()
    }

    /// Append `message` to the end of the feed.
    fn append(&self, message: FeedMessage) -> Result<FeedReceipt, FeedError>;

    /// Register `listener` to be called with every block appended to the feed from now on.
    ///
    /// Implementations must not hold internal locks while calling listeners. Listeners may run on the
    /// appending thread before [`append`](Feed::append) returns.
    fn subscribe(&self, listener: impl Fn(&FeedBlock) + Send + Sync + 'static) -> SubscriptionId;

    /// Remove a listener registered with [`subscribe`](Feed::subscribe).
    fn unsubscribe(&self, subscription: SubscriptionId);

    /// Hint that blocks from `start` onwards are about to be read, so a networked implementation
    /// can begin fetching them.
    fn download(&self, _start: SeqNumber) {}
}

#[derive(Debug)]
pub enum FeedError {
    NotWritable { feed: FeedKey },
    Closed { feed: FeedKey },
    Encode(io::Error),
}

impl From<io::Error> for FeedError {
    fn from(value: io::Error) -> Self {
        FeedError::Encode(value)
    }
}
