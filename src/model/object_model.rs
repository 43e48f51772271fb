/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A key/value object in which the last applied write to a key wins.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::mutation::ProcessMeta;

use super::{BorshCodec, Model};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectModel {
    fields: BTreeMap<String, String>,
}

impl ObjectModel {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ObjectMutation {
    Set { key: String, value: String },
    Delete { key: String },
}

impl ObjectMutation {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        ObjectMutation::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        ObjectMutation::Delete { key: key.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ObjectModelSnapshot {
    pub fields: BTreeMap<String, String>,
}

impl Model for ObjectModel {
    const TYPE_URL: &'static str = "causal_pipeline.models.Object";

    type Mutation = ObjectMutation;
    type Snapshot = ObjectModelSnapshot;
    type MutationCodec = BorshCodec<ObjectMutation>;
    type SnapshotCodec = BorshCodec<ObjectModelSnapshot>;

    fn process(&mut self, mutation: ObjectMutation, _meta: &ProcessMeta) {
        match mutation {
            ObjectMutation::Set { key, value } => {
                self.fields.insert(key, value);
            }
            ObjectMutation::Delete { key } => {
                self.fields.remove(&key);
            }
        }
    }

    fn snapshot(&self) -> Option<ObjectModelSnapshot> {
        Some(ObjectModelSnapshot {
            fields: self.fields.clone(),
        })
    }

    fn reset(&mut self, snapshot: Option<ObjectModelSnapshot>) {
        self.fields = snapshot.map(|snapshot| snapshot.fields).unwrap_or_default();
    }
}
