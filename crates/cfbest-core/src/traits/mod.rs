//! Collaborator traits
//!
//! The core only talks to the outside world through these interfaces.
//!
//! - [`FeedSource`]: deliver raw measurement rows
//! - [`DnsRecordWriter`]: overwrite one DNS record set
//! - [`StateStore`]: remember what was last applied (optional skip cache)
//! - [`ReportSink`]: persist the per-run snapshot

pub mod dns_writer;
pub mod feed_source;
pub mod report_sink;
pub mod state_store;

pub use dns_writer::{Ack, DnsRecordWriter, DnsRecordWriterFactory};
pub use feed_source::{FeedSource, FeedSourceFactory};
pub use report_sink::ReportSink;
pub use state_store::{AppliedRecord, StateStore, StateStoreFactory};
