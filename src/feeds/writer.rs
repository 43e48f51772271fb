/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed writers on top of feeds.

use std::{marker::PhantomData, sync::Arc};

use crate::types::data_types::FeedKey;

use super::{messages::FeedReceipt, pluggables::FeedError};

/// Something that appends values of type `T` to a single feed.
pub trait FeedWriter<T>: Send + Sync {
    /// Get the key of the feed that this writer appends to.
    fn feed_key(&self) -> FeedKey;

    /// Append `value`, returning where it was stored.
    fn write(&self, value: T) -> Result<FeedReceipt, FeedError>;
}

impl<T, W: FeedWriter<T> + ?Sized> FeedWriter<T> for Arc<W> {
    fn feed_key(&self) -> FeedKey {
        (**self).feed_key()
    }

    fn write(&self, value: T) -> Result<FeedReceipt, FeedError> {
        (**self).write(value)
    }
}

/// Adapts a writer of `U` into a writer of `T` by passing every value through a mapping function.
pub struct MappedFeedWriter<T, U, W, F>
where
    W: FeedWriter<U>,
    F: Fn(T) -> Result<U, FeedError> + Send + Sync,
{
    inner: W,
    map: F,
    _types: PhantomData<fn(T) -> U>,
}

impl<T, U, W, F> MappedFeedWriter<T, U, W, F>
where
    W: FeedWriter<U>,
    F: Fn(T) -> Result<U, FeedError> + Send + Sync,
{
    pub fn new(inner: W, map: F) -> Self {
        Self {
            inner,
            map,
            _types: PhantomData,
        }
    }
}

impl<T, U, W, F> FeedWriter<T> for MappedFeedWriter<T, U, W, F>
where
    W: FeedWriter<U>,
    F: Fn(T) -> Result<U, FeedError> + Send + Sync,
{
    fn feed_key(&self) -> FeedKey {
        self.inner.feed_key()
    }

    fn write(&self, value: T) -> Result<FeedReceipt, FeedError> {
        self.inner.write((self.map)(value)?)
    }
}
