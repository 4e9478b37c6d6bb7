// # DNS Record Writer Trait
//
// Defines the interface for overwriting one DNS record set via a provider API.
//
// ## Implementations
//
// - Huawei Cloud DNS: `cfbest-provider-huawei` crate
//
// ## Usage
//
// ```rust,ignore
// use cfbest_core::planner::RecordType;
// use cfbest_core::DnsRecordWriter;
//
// let ack = writer
//     .upsert(
//         "ff8080...",
//         RecordType::A,
//         "cdn.example.com.",
//         60,
//         &["104.16.1.1".to_string(), "104.16.1.2".to_string()],
//     )
//     .await?;
// ```

use async_trait::async_trait;

use crate::planner::RecordType;

/// Successful write acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// The record set that was written
    pub record_id: String,
    /// Values the record now carries, in the order sent
    pub values: Vec<String>,
    /// True when the writer only logged the request
    pub dry_run: bool,
}

/// Trait for DNS record writers
///
/// A writer performs exactly one overwrite per call. It must not retry, cache
/// or decide whether a write is needed; the apply executor records its error
/// and carries on with the remaining actions, and retries belong to whoever
/// schedules the next run.
///
/// # Thread Safety
///
/// Implementations are shared across apply tasks and must be `Send + Sync`.
/// The executor never issues two concurrent calls for the same `record_id`.
#[async_trait]
pub trait DnsRecordWriter: Send + Sync {
    /// Overwrite a record set with `values`
    ///
    /// # Idempotency
    ///
    /// Writing the same values twice must leave the record in the same state.
    ///
    /// # Parameters
    ///
    /// - `record_id`: provider-side record set id
    /// - `record_type`: `A` or `AAAA`
    /// - `name`: fully qualified record name
    /// - `ttl`: time to live in seconds
    /// - `values`: addresses in preference order
    async fn upsert(
        &self,
        record_id: &str,
        record_type: RecordType,
        name: &str,
        ttl: u32,
        values: &[String],
    ) -> Result<Ack, crate::Error>;

    /// Writer name (for logging)
    fn writer_name(&self) -> &'static str;
}

/// Helper trait for constructing writers from configuration
pub trait DnsRecordWriterFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn DnsRecordWriter>, crate::Error>;
}
