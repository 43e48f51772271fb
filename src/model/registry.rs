/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Creates [`StateMachine`]s by type URL.
//!
//! A [`ModelRegistry`] is an explicit value that is handed to everything that needs to instantiate
//! models. Cloning a registry creates another handle to the same set of models, so a model registered
//! through any handle becomes available to every holder.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{event_bus::Subscribers, types::data_types::SubscriptionId};

use super::{Model, ModelStateMachine, StateMachine};

type Constructor = Box<dyn Fn() -> Box<dyn StateMachine> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    constructors: RwLock<HashMap<&'static str, Constructor>>,
    registered: Subscribers<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `M` available under [`M::TYPE_URL`](Model::TYPE_URL), and notify subscribers. Registering a
    /// model again has no effect.
    pub fn register<M: Model>(&self) -> &Self {
        let added = {
            let mut constructors = self.inner.constructors.write().unwrap();
            if constructors.contains_key(M::TYPE_URL) {
                false
            } else {
                constructors.insert(
                    M::TYPE_URL,
                    Box::new(|| Box::new(ModelStateMachine::<M>::new()) as Box<dyn StateMachine>),
                );
                true
            }
        };
        if added {
            log::debug!("Registered model {}.", M::TYPE_URL);
            self.inner.registered.emit(&M::TYPE_URL.to_string());
        }
        self
    }

    pub fn has_model(&self, type_url: &str) -> bool {
        self.inner.constructors.read().unwrap().contains_key(type_url)
    }

    /// Create an empty state machine for the model registered under `type_url`.
    pub fn create(&self, type_url: &str) -> Option<Box<dyn StateMachine>> {
        self.inner
            .constructors
            .read()
            .unwrap()
            .get(type_url)
            .map(|constructor| constructor())
    }

    /// Register `callback` to be called with the type URL of every model registered from now on.
    pub fn subscribe(&self, callback: impl Fn(&String) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.registered.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.inner.registered.unsubscribe(subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::model::{list_model::ListModel, object_model::ObjectModel};

    use super::*;

    #[test]
    fn creates_registered_models_by_type_url() {
        let registry = ModelRegistry::new();
        assert!(registry.create(ObjectModel::TYPE_URL).is_none());

        registry.register::<ObjectModel>().register::<ListModel>();
        let machine = registry.create(ObjectModel::TYPE_URL).unwrap();
        assert_eq!(machine.type_url(), ObjectModel::TYPE_URL);
        assert!(registry.clone().has_model(ListModel::TYPE_URL));
    }

    #[test]
    fn subscribers_hear_about_new_models_once() {
        let registry = ModelRegistry::new();
        let registered = Arc::new(Mutex::new(Vec::new()));
        let registered_clone = registered.clone();
        registry.subscribe(move |type_url| registered_clone.lock().unwrap().push(type_url.clone()));

        registry.register::<ObjectModel>();
        registry.register::<ObjectModel>();

        assert_eq!(
            *registered.lock().unwrap(),
            vec![ObjectModel::TYPE_URL.to_string()]
        );
    }
}
