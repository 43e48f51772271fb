//! Types that are used across multiple components of the crate.
//!
//! Other types, specific to single components, live next to those components, e.g.,
//! [`crate::feeds::messages`].

pub mod crypto_primitives;

pub mod data_types;

pub mod mutation;

pub mod timeframe;
