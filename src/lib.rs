/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A library for replicating objects between peers over append-only feeds.
//!
//! Every peer writes to one feed of its own, and reads the feeds of every peer it knows about. Every
//! message carries the [timeframe](types::timeframe) its writer had processed when writing it, so
//! that a reader can deliver messages in an order that respects causality, even though it reads
//! many feeds that grow independently.
//!
//! The crate is organized in layers:
//! 1. [Feeds](feeds): the storage that peers replicate. The library user plugs in their own
//!    implementation of [`Feed`](feeds::pluggables::Feed).
//! 2. [Pipelines](pipeline): merge many feeds into one causally ordered stream of blocks, and track
//!    how far that stream has been processed.
//! 3. [State managers](state_manager): apply the mutations of one object to a
//!    [model](model), optimistically for local writes, and reconcile them with the mutations of
//!    other peers in the same [order](ordering) on every peer.
//! 4. [Replicas](replica): tie the above together, and let the library user observe what happens
//!    through [events](events).

pub mod event_bus;

pub mod events;

pub mod feeds;

pub mod logging;

pub mod model;

pub mod object_manager;

pub mod ordering;

pub mod pipeline;

pub mod replica;

pub mod state_manager;

pub mod types;
