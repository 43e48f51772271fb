/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or integers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::Add,
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;

/// Identifier of a [feed](crate::feeds), i.e., the append-only log written by exactly one peer.
///
/// A `FeedKey` is the 32-byte encoding of the Ed25519 [`VerifyingKey`] of the feed's writer.
///
/// ## Ordering
///
/// `FeedKey`s are totally ordered by comparing their bytes lexicographically. This is the same order
/// as comparing the lowercase hexadecimal encodings of the keys as strings. The order is used to break
/// ties between causally-independent mutations in [`insertion_index`](crate::ordering::insertion_index),
/// so it must never change between releases.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct FeedKey([u8; 32]);

impl FeedKey {
    /// Create a new `FeedKey` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `FeedKey`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Get the lowercase hexadecimal encoding of this `FeedKey`.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

impl From<VerifyingKey> for FeedKey {
    fn from(verifying_key: VerifyingKey) -> Self {
        Self(verifying_key.to_bytes())
    }
}

impl From<&VerifyingKey> for FeedKey {
    fn from(verifying_key: &VerifyingKey) -> Self {
        Self(verifying_key.to_bytes())
    }
}

impl Display for FeedKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for FeedKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "FeedKey({})", &encoded[0..7])
    }
}

/// Position of a message inside a feed. The first message appended to a feed has sequence number 0.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SeqNumber(u64);

impl SeqNumber {
    /// Create a new `SeqNumber` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the sequence number of the first message of every feed, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` of this `SeqNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the sequence number of the message directly before this one in the same feed, or `None` if
    /// this is the first message of the feed.
    pub fn prev(&self) -> Option<SeqNumber> {
        self.0.checked_sub(1).map(SeqNumber)
    }
}

impl Display for SeqNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u64) -> Self::Output {
        SeqNumber(self.0.add(rhs))
    }
}

/// Identifier of a replicated object whose state is managed by a
/// [`StateManager`](crate::state_manager::StateManager).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Create a new `ObjectId` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a new, random `ObjectId`.
    pub fn random() -> Self {
        Self(rand::random::<[u8; 32]>())
    }

    /// Get the inner `[u8; 32]` value of this `ObjectId`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "ObjectId({})", &encoded[0..7])
    }
}

/// 32-byte cryptographic hash. Within this crate, `CryptoHash`-es are always SHA256 hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a subscription made with a `subscribe` method, used to `unsubscribe` later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Create a new `SubscriptionId` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `SubscriptionId`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}
