// # State Store Trait
//
// Defines the interface for the applied-state cache.
//
// ## Purpose
//
// The planner always produces full-overwrite actions. When the DNS provider
// bills or rate-limits per write, the pipeline can consult this store after
// planning and skip actions whose write equals the one last sent
// successfully to the same record set. The store tracks, per record id:
// - The full write (name, type, ttl and values)
// - When it was applied
//
// ## Implementations
//
// - `MemoryStateStore`: per-process
// - `FileStateStore`: JSON file with atomic writes and backup recovery
//
// ## Usage
//
// ```rust,ignore
// use cfbest_core::StateStore;
//
// let store = /* StateStore implementation */;
//
// if store.get_applied(&action.record_id).await?.is_some_and(|r| r.matches(&action)) {
//     // skip the write
// }
// store.set_applied(&action).await?;
// ```

use async_trait::async_trait;

use crate::planner::{RecordType, ReconciliationAction};

/// What was last written to a record set
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AppliedRecord {
    pub record_name: String,
    pub record_type: RecordType,
    pub ttl: u32,
    /// Values in the order they were sent
    pub values: Vec<String>,
    /// Timestamp of the successful write
    pub last_applied: chrono::DateTime<chrono::Utc>,
}

impl AppliedRecord {
    /// Record `action` as written now
    ///
    /// `pub(crate)` so that only store implementations mint records.
    pub(crate) fn new(action: &ReconciliationAction) -> Self {
        Self {
            record_name: action.record_name.clone(),
            record_type: action.record_type,
            ttl: action.ttl,
            values: action.values(),
            last_applied: chrono::Utc::now(),
        }
    }

    /// Whether writing `action` would send exactly what was applied
    ///
    /// Value order counts, and so do name, type and ttl.
    pub fn matches(&self, action: &ReconciliationAction) -> bool {
        self.record_name == action.record_name
            && self.record_type == action.record_type
            && self.ttl == action.ttl
            && self.values == action.values()
    }
}

/// Trait for applied-state stores
///
/// All methods must be safe to call concurrently from apply tasks.
/// Implementations hold no business logic: the pipeline decides when to skip.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last applied record for a record id
    async fn get_applied(&self, record_id: &str) -> Result<Option<AppliedRecord>, crate::Error>;

    /// Remember a successful write, keyed by `action.record_id`
    async fn set_applied(&self, action: &ReconciliationAction) -> Result<(), crate::Error>;

    /// Persist pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing state stores from configuration
#[async_trait]
pub trait StateStoreFactory: Send + Sync {
    async fn create(
        &self,
        config: &crate::config::StateStoreConfig,
    ) -> Result<Box<dyn StateStore>, crate::Error>;
}
