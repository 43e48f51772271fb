/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Vector clocks over feeds.
//!
//! A [`Timeframe`] maps every [`FeedKey`] it knows about to the [`SeqNumber`] of the latest message
//! from that feed which has been accounted for. A feed that is absent from a timeframe has had none of
//! its messages accounted for.
//!
//! Timeframes are used in two roles:
//! 1. **Declared timeframes**: every [`FeedMessage`](crate::feeds::messages::FeedMessage) carries the
//!    timeframe its writer had processed at the time of writing. These are the message's causal
//!    dependencies.
//! 2. **Processed timeframes**: a [`TimeframeClock`](crate::pipeline::timeframe_clock::TimeframeClock)
//!    tracks how far a consumer has processed each feed.
//!
//! A message can be safely processed once its declared timeframe has no
//! [`dependencies`](Timeframe::dependencies) against the consumer's processed timeframe.

use std::{
    collections::{btree_map, BTreeMap},
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{FeedKey, SeqNumber};

/// Immutable-by-convention mapping from [`FeedKey`] to the highest [`SeqNumber`] accounted for.
///
/// ## Ordering of frames
///
/// Frames are kept in ascending order of `FeedKey`, so iterating through a `Timeframe` and serializing
/// it are both deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Timeframe(BTreeMap<FeedKey, SeqNumber>);

impl Timeframe {
    /// Create an empty `Timeframe`.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Create a `Timeframe` from `(feed, seq)` pairs. If a feed appears more than once, the highest
    /// sequence number is kept.
    pub fn from_frames(frames: impl IntoIterator<Item = (FeedKey, SeqNumber)>) -> Self {
        let mut timeframe = Timeframe::new();
        for (feed, seq) in frames {
            timeframe.advance(feed, seq);
        }
        timeframe
    }

    /// Get the sequence number recorded for `feed`, if any.
    pub fn get(&self, feed: &FeedKey) -> Option<SeqNumber> {
        self.0.get(feed).copied()
    }

    /// Iterate through the `(feed, seq)` pairs of this timeframe in ascending order of `feed`.
    pub fn frames(&self) -> btree_map::Iter<'_, FeedKey, SeqNumber> {
        self.0.iter()
    }

    /// Iterate through the feeds that this timeframe has a frame for.
    pub fn feeds(&self) -> btree_map::Keys<'_, FeedKey, SeqNumber> {
        self.0.keys()
    }

    /// Get whether this timeframe has no frames.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the number of feeds this timeframe has a frame for.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get the total number of messages accounted for by this timeframe, summed over all of its feeds.
    pub fn total_messages(&self) -> u64 {
        self.0.values().map(|seq| seq.int() + 1).sum()
    }

    /// Compute the pointwise maximum of `a` and `b` over the union of their feeds.
    pub fn merge(a: &Timeframe, b: &Timeframe) -> Timeframe {
        let mut merged = a.clone();
        for (feed, seq) in b.frames() {
            merged.advance(*feed, *seq);
        }
        merged
    }

    /// Compute the pointwise maximum of all `timeframes`.
    pub fn merge_all<'a>(timeframes: impl IntoIterator<Item = &'a Timeframe>) -> Timeframe {
        timeframes
            .into_iter()
            .fold(Timeframe::new(), |merged, timeframe| {
                Timeframe::merge(&merged, timeframe)
            })
    }

    /// Get the frames of `target` that `have` has not caught up to yet, i.e., the frames whose feed is
    /// either missing from `have`, or has a lower sequence number in `have`.
    ///
    /// An empty result means that `have` causally dominates `target`.
    pub fn dependencies(target: &Timeframe, have: &Timeframe) -> Timeframe {
        Timeframe(
            target
                .frames()
                .filter(|(feed, seq)| match have.get(feed) {
                    Some(have_seq) => have_seq < **seq,
                    None => true,
                })
                .map(|(feed, seq)| (*feed, *seq))
                .collect(),
        )
    }

    /// Record that `seq` of `feed` has been accounted for. Never lowers an existing frame.
    pub(crate) fn advance(&mut self, feed: FeedKey, seq: SeqNumber) {
        match self.0.entry(feed) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(seq);
            }
            btree_map::Entry::Occupied(mut entry) => {
                if *entry.get() < seq {
                    entry.insert(seq);
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a Timeframe {
    type Item = (&'a FeedKey, &'a SeqNumber);
    type IntoIter = btree_map::Iter<'a, FeedKey, SeqNumber>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames()
    }
}

impl FromIterator<(FeedKey, SeqNumber)> for Timeframe {
    fn from_iter<T: IntoIterator<Item = (FeedKey, SeqNumber)>>(iter: T) -> Self {
        Timeframe::from_frames(iter)
    }
}

impl Display for Timeframe {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, (feed, seq)) in self.frames().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}[{}]", feed, seq)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> FeedKey {
        FeedKey::new([byte; 32])
    }

    fn tf(frames: &[(u8, u64)]) -> Timeframe {
        frames
            .iter()
            .map(|(feed, seq)| (key(*feed), SeqNumber::new(*seq)))
            .collect()
    }

    #[test]
    fn merge_takes_pointwise_maximum() {
        let merged = Timeframe::merge(&tf(&[(1, 2), (2, 7)]), &tf(&[(2, 3), (3, 0)]));
        assert_eq!(merged, tf(&[(1, 2), (2, 7), (3, 0)]));
    }

    #[test]
    fn merge_is_monotonic_for_every_feed() {
        let updates = [tf(&[(1, 3)]), tf(&[(1, 1), (2, 4)]), tf(&[(2, 2)]), tf(&[(1, 9)])];
        let mut current = Timeframe::new();
        for update in updates.iter() {
            let next = Timeframe::merge(&current, update);
            for (feed, seq) in current.frames() {
                assert!(next.get(feed).unwrap() >= *seq);
            }
            current = next;
        }
        assert_eq!(current, tf(&[(1, 9), (2, 4)]));
        assert_eq!(Timeframe::merge_all(updates.iter()), current);
    }

    #[test]
    fn dependencies_are_empty_iff_have_dominates_target() {
        let target = tf(&[(1, 2), (2, 0)]);

        assert!(Timeframe::dependencies(&target, &tf(&[(1, 2), (2, 0)])).is_empty());
        assert!(Timeframe::dependencies(&target, &tf(&[(1, 5), (2, 1), (3, 1)])).is_empty());

        assert_eq!(
            Timeframe::dependencies(&target, &tf(&[(1, 1), (2, 0)])),
            tf(&[(1, 2)])
        );
        assert_eq!(Timeframe::dependencies(&target, &tf(&[(1, 2)])), tf(&[(2, 0)]));
        assert_eq!(Timeframe::dependencies(&target, &Timeframe::new()), target);
        assert!(Timeframe::dependencies(&Timeframe::new(), &Timeframe::new()).is_empty());
    }

    #[test]
    fn total_messages_counts_every_accounted_message() {
        assert_eq!(Timeframe::new().total_messages(), 0);
        assert_eq!(tf(&[(1, 0), (2, 4)]).total_messages(), 6);
    }

    #[test]
    fn frames_iterate_in_feed_key_order() {
        let timeframe = tf(&[(9, 0), (1, 0), (5, 0)]);
        let feeds: Vec<FeedKey> = timeframe.feeds().copied().collect();
        assert_eq!(feeds, vec![key(1), key(5), key(9)]);
    }

    #[test]
    fn borsh_encoding_is_stable() {
        let timeframe = tf(&[(2, 1), (1, 3)]);
        let bytes = timeframe.try_to_vec().unwrap();
        assert_eq!(Timeframe::try_from_slice(&bytes).unwrap(), timeframe);
        assert_eq!(bytes, tf(&[(1, 3), (2, 1)]).try_to_vec().unwrap());
    }
}
