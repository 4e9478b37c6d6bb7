//! Plugin registry for collaborators
//!
//! Feed sources, DNS record writers and state stores are registered by type
//! name, so the driver wires collaborators from configuration without a
//! hard-coded match on every implementation.
//!
//! ## Registration
//!
//! Implementation crates expose a `register` function:
//!
//! ```rust,ignore
//! // In cfbest-provider-huawei
//! pub fn register(registry: &Registry) {
//!     registry.register_writer("huawei", Box::new(HuaweiFactory::default()));
//! }
//! ```
//!
//! Lookups use the configuration's `type_name()`: the built-in variant name,
//! or the `factory` field of a `Custom` variant.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{FeedConfig, ProviderConfig, StateStoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileStateStoreFactory, MemoryStateStoreFactory};
use crate::traits::{DnsRecordWriter, FeedSource, StateStore};
use crate::traits::{DnsRecordWriterFactory, FeedSourceFactory, StateStoreFactory};

/// Registry of collaborator factories
///
/// ## Thread Safety
///
/// Interior mutability with `RwLock`: concurrent lookups, exclusive
/// registration. A poisoned lock is recovered, since the maps stay valid
/// after any panic in a caller.
#[derive(Default)]
pub struct Registry {
    writers: RwLock<HashMap<String, Box<dyn DnsRecordWriterFactory>>>,
    feeds: RwLock<HashMap<String, Box<dyn FeedSourceFactory>>>,
    state_stores: RwLock<HashMap<String, Arc<dyn StateStoreFactory>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `memory` and `file` state stores pre-registered
    pub fn with_builtin_state_stores() -> Self {
        let registry = Self::new();
        registry.register_state_store("memory", Box::new(MemoryStateStoreFactory));
        registry.register_state_store("file", Box::new(FileStateStoreFactory));
        registry
    }

    pub fn register_writer(&self, name: impl Into<String>, factory: Box<dyn DnsRecordWriterFactory>) {
        self.writers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    pub fn register_feed(&self, name: impl Into<String>, factory: Box<dyn FeedSourceFactory>) {
        self.feeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    pub fn register_state_store(&self, name: impl Into<String>, factory: Box<dyn StateStoreFactory>) {
        self.state_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::from(factory));
    }

    /// Create a writer from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(writer)`: created instance
    /// - `Err(Error::Config)`: type not registered, or the factory rejected
    ///   the configuration
    pub fn create_writer(&self, config: &ProviderConfig) -> Result<Box<dyn DnsRecordWriter>> {
        let name = config.type_name();
        let writers = self.writers.read().unwrap_or_else(PoisonError::into_inner);
        let factory = writers
            .get(name)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", name)))?;
        factory.create(config)
    }

    /// Create a feed source from configuration
    pub fn create_feed(&self, config: &FeedConfig) -> Result<Box<dyn FeedSource>> {
        let name = config.type_name();
        let feeds = self.feeds.read().unwrap_or_else(PoisonError::into_inner);
        let factory = feeds
            .get(name)
            .ok_or_else(|| Error::config(format!("Unknown feed type: {}", name)))?;
        factory.create(config)
    }

    /// Create a state store from configuration
    ///
    /// The lock is released before the (async) factory call.
    pub async fn create_state_store(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>> {
        let name = config.type_name();
        let factory = {
            let stores = self.state_stores.read().unwrap_or_else(PoisonError::into_inner);
            stores
                .get(name)
                .cloned()
                .ok_or_else(|| Error::config(format!("Unknown state store type: {}", name)))?
        };
        factory.create(config).await
    }

    pub fn list_writers(&self) -> Vec<String> {
        Self::names(&self.writers)
    }

    pub fn list_feeds(&self) -> Vec<String> {
        Self::names(&self.feeds)
    }

    pub fn list_state_stores(&self) -> Vec<String> {
        Self::names(&self.state_stores)
    }

    pub fn has_writer(&self, name: &str) -> bool {
        self.writers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_feed(&self, name: &str) -> bool {
        self.feeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn names<V>(map: &RwLock<HashMap<String, V>>) -> Vec<String> {
        let mut names: Vec<String> = map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
