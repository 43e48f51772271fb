/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory [`Feed`] implementation.
//!
//! Every [`MemoryFeed`] opened from the same [`MemoryFeedStore`] with the same key shares one log, so
//! a single store stands in for a perfectly replicated network of peers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    event_bus::Subscribers,
    types::data_types::{FeedKey, SeqNumber, SubscriptionId},
};

use super::{
    messages::{FeedBlock, FeedMessage, FeedReceipt},
    pluggables::{Feed, FeedError},
};

/// Opens [`MemoryFeed`]s by key.
#[derive(Clone, Default)]
pub struct MemoryFeedStore {
    feeds: Arc<Mutex<HashMap<FeedKey, Arc<MemoryLog>>>>,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the feed identified by `key`, creating it if it does not exist yet. Only handles opened
    /// with `writable` set may append to the feed.
    pub fn open_feed(&self, key: FeedKey, writable: bool) -> MemoryFeed {
        let log = self
            .feeds
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryLog::default()))
            .clone();
        MemoryFeed { key, writable, log }
    }

    /// Get the keys of every feed opened so far, in ascending order.
    pub fn feed_keys(&self) -> Vec<FeedKey> {
        let mut keys: Vec<FeedKey> = self.feeds.lock().unwrap().keys().copied().collect();
        keys.sort();
        keys
    }
}

#[derive(Default)]
struct MemoryLog {
    messages: Mutex<LogState>,
    listeners: Subscribers<FeedBlock>,
}

#[derive(Default)]
struct LogState {
    messages: Vec<FeedMessage>,
    closed: bool,
}

/// Handle to an in-memory feed.
#[derive(Clone)]
pub struct MemoryFeed {
    key: FeedKey,
    writable: bool,
    log: Arc<MemoryLog>,
}

impl MemoryFeed {
    /// Reject every future append. Reads keep working.
    pub fn close(&self) {
        self.log.messages.lock().unwrap().closed = true;
    }
}

impl Feed for MemoryFeed {
    fn key(&self) -> FeedKey {
        self.key
    }

    fn length(&self) -> u64 {
        self.log.messages.lock().unwrap().messages.len() as u64
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn get(&self, seq: SeqNumber) -> Option<FeedBlock> {
        let state = self.log.messages.lock().unwrap();
        let data = state.messages.get(seq.int() as usize)?.clone();
        Some(FeedBlock {
            feed_key: self.key,
            seq,
            data,
        })
    }

    fn read(&self, range: std::ops::Range<u64>) -> Vec<FeedBlock> {
        let state = self.log.messages.lock().unwrap();
        range
            .map_while(|seq| {
                state.messages.get(seq as usize).map(|data| FeedBlock {
                    feed_key: self.key,
                    seq: SeqNumber::new(seq),
                    data: data.clone(),
                })
            })
            .collect()
    }

    fn append(&self, message: FeedMessage) -> Result<FeedReceipt, FeedError> {
        if !self.writable {
            return Err(FeedError::NotWritable { feed: self.key });
        }

        let block = {
            let mut state = self.log.messages.lock().unwrap();
            if state.closed {
                return Err(FeedError::Closed { feed: self.key });
            }
            let seq = SeqNumber::new(state.messages.len() as u64);
            state.messages.push(message.clone());
            FeedBlock {
                feed_key: self.key,
                seq,
                data: message,
            }
        };

        self.log.listeners.emit(&block);
        Ok(block.receipt())
    }

    fn subscribe(&self, listener: impl Fn(&FeedBlock) + Send + Sync + 'static) -> SubscriptionId {
        self.log.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.log.listeners.unsubscribe(subscription);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::types::timeframe::Timeframe;

    use super::*;

    fn message(payload: u8) -> FeedMessage {
        FeedMessage::new(Timeframe::new(), vec![payload])
    }

    #[test]
    fn handles_with_the_same_key_share_a_log() {
        let store = MemoryFeedStore::new();
        let key = FeedKey::new([1; 32]);
        let writer = store.open_feed(key, true);
        let reader = store.open_feed(key, false);

        assert_eq!(writer.append(message(1)).unwrap().seq, SeqNumber::new(0));
        assert_eq!(writer.append(message(2)).unwrap().seq, SeqNumber::new(1));

        assert_eq!(reader.length(), 2);
        assert_eq!(reader.get(SeqNumber::new(1)).unwrap().data.payload, vec![2]);
        assert_eq!(reader.read(1..10).len(), 1);
        assert!(reader.get(SeqNumber::new(2)).is_none());
        assert_eq!(store.feed_keys(), vec![key]);
    }

    #[test]
    fn read_only_and_closed_feeds_reject_appends() {
        let store = MemoryFeedStore::new();
        let key = FeedKey::new([1; 32]);

        let reader = store.open_feed(key, false);
        assert!(matches!(
            reader.append(message(1)),
            Err(FeedError::NotWritable { .. })
        ));

        let writer = store.open_feed(key, true);
        writer.close();
        assert!(matches!(
            writer.append(message(1)),
            Err(FeedError::Closed { .. })
        ));
        assert_eq!(writer.length(), 0);
    }

    #[test]
    fn listeners_see_every_append_and_may_read_the_feed() {
        let store = MemoryFeedStore::new();
        let feed = store.open_feed(FeedKey::new([1; 32]), true);
        let seen = Arc::new(AtomicU64::new(0));

        let seen_clone = seen.clone();
        let feed_clone = feed.clone();
        let subscription = feed.subscribe(move |block| {
            // Listeners run outside the feed lock.
            assert_eq!(feed_clone.length(), block.seq.int() + 1);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        feed.append(message(1)).unwrap();
        feed.append(message(2)).unwrap();
        feed.unsubscribe(subscription);
        feed.append(message(3)).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
