/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An append-only list that remembers who appended each item.
//!
//! The list's state depends on the order of every mutation applied to it, and it does not support
//! compaction: [`snapshot`](Model::snapshot) always returns `None`, so snapshots of list objects keep
//! their full mutation history.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{data_types::FeedKey, mutation::ProcessMeta};

use super::{BorshCodec, Model};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ListItem {
    pub author: FeedKey,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListModel {
    items: Vec<ListItem>,
}

impl ListModel {
    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn values(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.value.as_str()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ListMutation {
    pub value: String,
}

impl ListMutation {
    pub fn push(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Model for ListModel {
    const TYPE_URL: &'static str = "causal_pipeline.models.List";

    type Mutation = ListMutation;
    type Snapshot = Vec<ListItem>;
    type MutationCodec = BorshCodec<ListMutation>;
    type SnapshotCodec = BorshCodec<Vec<ListItem>>;

    fn process(&mut self, mutation: ListMutation, meta: &ProcessMeta) {
        self.items.push(ListItem {
            author: meta.author,
            value: mutation.value,
        });
    }

    fn snapshot(&self) -> Option<Vec<ListItem>> {
        None
    }

    fn reset(&mut self, snapshot: Option<Vec<ListItem>>) {
        self.items = snapshot.unwrap_or_default();
    }
}
