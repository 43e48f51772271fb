/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Append-only, single-writer logs that peers replicate to each other.
//!
//! # Pluggable feed storage
//!
//! - How feeds are stored and replicated between peers is up to the library user.
//! - The pipeline merely requires that the feeds it reads from implement the narrow contract in
//!   [`pluggables`]: append, read by position or range, length, and subscribe to new entries.
//! - [`memory`] provides an implementation that keeps every feed in memory.
//!
//! Values are written to feeds through [`FeedWriter`](writer::FeedWriter)s, which the pipeline hands
//! out for its write feed.

pub mod memory;

pub mod messages;

pub mod pluggables;

pub mod writer;
