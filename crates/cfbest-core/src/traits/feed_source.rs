// # Feed Source Trait
//
// Defines the interface for fetching raw measurement rows.
//
// ## Implementations
//
// - HTTP page (HTML table or JSON): `cfbest-feed-http` crate
//
// A failure here is the only thing allowed to abort a run: without rows there
// is nothing to select.

use async_trait::async_trait;

use crate::measurement::RawRow;

/// Trait for measurement feeds
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch one batch of raw rows
    ///
    /// # Returns
    ///
    /// - `Ok(rows)`: rows in feed order (may be empty; the pipeline decides)
    /// - `Err(Error::Fetch)`: transport or format failure
    async fn fetch_rows(&self) -> Result<Vec<RawRow>, crate::Error>;

    /// Source name (for logging)
    fn source_name(&self) -> &'static str;
}

/// Helper trait for constructing feed sources from configuration
pub trait FeedSourceFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::FeedConfig,
    ) -> Result<Box<dyn FeedSource>, crate::Error>;
}
