/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deterministic total order of the mutations applied to an object.
//!
//! Every replica receives an object's mutations in a different order, but must apply them in the
//! same order to converge. [`insertion_index`] computes where a newly received mutation goes in an
//! object's ordered mutation queue, such that:
//! 1. A mutation is always placed after every mutation it causally depends on, regardless of feed
//!    keys.
//! 2. Causally independent mutations are placed in ascending order of [`FeedKey`](crate::types::data_types::FeedKey).
//!
//! Combined with models in which the last applied mutation wins, the second rule makes the mutation
//! from the feed with the highest key the one whose effect survives a conflict. This is the only
//! conflict resolution rule, so it must be the same on every replica.

use crate::types::{mutation::MutationMeta, timeframe::Timeframe};

/// Get the position in `existing` at which `new` must be inserted.
///
/// Entries up to and including the last entry from `new`'s own feed never move, since a feed's
/// mutations always arrive in order. After that entry, `new` is inserted before the first entry `e`
/// such that `new` does not depend on anything beyond `e`'s effective timeframe and `new`'s feed
/// key is strictly lower than `e`'s. If there is no such entry, `new` is appended.
pub fn insertion_index<M: AsRef<MutationMeta>>(existing: &[M], new: &MutationMeta) -> usize {
    let start = existing
        .iter()
        .rposition(|entry| entry.as_ref().feed_key == new.feed_key)
        .map(|position| position + 1)
        .unwrap_or(0);

    existing[start..]
        .iter()
        .position(|entry| {
            let entry = entry.as_ref();
            Timeframe::dependencies(&new.timeframe, &entry.effective_timeframe()).is_empty()
                && new.feed_key < entry.feed_key
        })
        .map(|offset| start + offset)
        .unwrap_or(existing.len())
}
