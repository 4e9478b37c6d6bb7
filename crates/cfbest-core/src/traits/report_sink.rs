// # Report Sink Trait
//
// Optional output for the per-run snapshot. Not required for correctness:
// the pipeline logs sink failures and still reports the run as completed.

use async_trait::async_trait;

use crate::report::RunSnapshot;

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist one snapshot
    async fn write(&self, snapshot: &RunSnapshot) -> Result<(), crate::Error>;
}
