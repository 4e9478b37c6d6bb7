// # cfbest-core
//
// Core library for selecting Cloudflare edge addresses per Chinese carrier
// and publishing them as line-based DNS records.
//
// ## Architecture Overview
//
// - **Normalizer** (`measurement`): loosely structured feed rows to typed rows
// - **Aggregator** (`aggregate`): rows grouped by carrier
// - **Selection** (`selection`): ranked top-N per carrier and address family
// - **Planner** (`planner`): one full-overwrite action per configured pair
// - **Executor** (`engine::apply`): writer calls with per-action outcomes
// - **Pipeline** (`engine`): runs the above once against its collaborators
//
// Collaborators (`FeedSource`, `DnsRecordWriter`, `StateStore`,
// `ReportSink`) are traits; implementations live in sibling crates and are
// wired through the `Registry`.
//
// ## Design Principles
//
// 1. **Pure core**: normalizing, aggregating, selecting and planning do no I/O
// 2. **Partial failure**: only a missing feed aborts a run
// 3. **Idempotency**: identical selections produce identical writes

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod measurement;
pub mod planner;
pub mod registry;
pub mod report;
pub mod selection;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{CfBestConfig, DnsConfig, FeedConfig, LineConfig, ProviderConfig};
pub use engine::{EngineEvent, PairOutcome, PairStatus, Pipeline, RunReport};
pub use error::{Error, ParseError, ParseErrorKind, Result};
pub use measurement::{AddressFamily, CarrierKey, MeasurementRow, Normalizer, RawRow};
pub use registry::Registry;
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{DnsRecordWriter, FeedSource, ReportSink, StateStore};
