// # Memory State Store
//
// In-memory implementation of StateStore.
//
// State lives as long as the process. In interval mode this is enough to
// avoid rewriting identical record sets between ticks; a restart writes
// every record once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StateStoreConfig;
use crate::planner::ReconciliationAction;
use crate::traits::state_store::{AppliedRecord, StateStore, StateStoreFactory};

/// In-memory state store implementation
///
/// # Example
///
/// ```rust,no_run
/// use cfbest_core::measurement::{AddressFamily, CarrierKey};
/// use cfbest_core::planner::{RecordType, ReconciliationAction};
/// use cfbest_core::state::MemoryStateStore;
/// use cfbest_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let action = ReconciliationAction {
///         carrier: CarrierKey::Telecom,
///         address_family: AddressFamily::V4,
///         record_id: "ct-a".to_string(),
///         record_name: "cdn.example.com.".to_string(),
///         record_type: RecordType::A,
///         desired_addresses: vec!["104.16.1.1".parse()?],
///         ttl: 1,
///     };
///
///     let store = MemoryStateStore::new();
///     store.set_applied(&action).await?;
///
///     let applied = store.get_applied("ct-a").await?;
///     assert!(applied.is_some_and(|r| r.matches(&action)));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<String, AppliedRecord>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_applied(&self, record_id: &str) -> Result<Option<AppliedRecord>, Error> {
        Ok(self.inner.read().await.get(record_id).cloned())
    }

    async fn set_applied(&self, action: &ReconciliationAction) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(action.record_id.clone(), AppliedRecord::new(action));
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for `StateStoreConfig::Memory`
pub struct MemoryStateStoreFactory;

#[async_trait]
impl StateStoreFactory for MemoryStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::Memory => Ok(Box::new(MemoryStateStore::new())),
            _ => Err(Error::config("Invalid config for memory state store")),
        }
    }
}
