// # HTTP Measurement Feed
//
// `FeedSource` implementation for the public Cloudflare edge measurement page.
//
// ## Formats
//
// - HTML: the rendered page with its striped result table (`html` module)
// - JSON: the same page with `?format=json` (`json` module)
// - Auto: JSON when the body parses as JSON, HTML otherwise
//
// One fetch per run. No caching and no retry: a failure here aborts the run
// and the scheduler tries again on the next tick.

pub mod html;
pub mod json;

use std::time::Duration;

use cfbest_core::Registry;
use cfbest_core::config::{FeedConfig, FeedFormat};
use cfbest_core::measurement::RawRow;
use cfbest_core::traits::{FeedSource, FeedSourceFactory};
use cfbest_core::{Error, Result};

pub use html::parse_table;
pub use json::parse_json;

const USER_AGENT: &str = concat!("cfbest/", env!("CARGO_PKG_VERSION"));

/// Feed fetched from an HTTP endpoint
pub struct HttpFeedSource {
    url: String,
    format: FeedFormat,
    client: reqwest::Client,
}

impl HttpFeedSource {
    /// Create a feed source
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, format: FeedFormat, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            format,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_body(&self) -> Result<String> {
        let mut request = self.client.get(&self.url);
        if self.format == FeedFormat::Json && !self.url.contains("format=") {
            request = request.query(&[("format", "json")]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::fetch(format!("Request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("{} returned HTTP {}", self.url, status)));
        }

        response
            .text()
            .await
            .map_err(|e| Error::fetch(format!("Failed to read response body: {}", e)))
    }
}

/// Turn a response body into raw rows according to `format`
pub fn parse_body(body: &str, format: FeedFormat) -> Result<Vec<RawRow>> {
    match format {
        FeedFormat::Html => parse_table(body),
        FeedFormat::Json => parse_json(body),
        FeedFormat::Auto => {
            let trimmed = body.trim_start();
            if (trimmed.starts_with('{') || trimmed.starts_with('['))
                && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
            {
                parse_json(trimmed)
            } else {
                parse_table(body)
            }
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_rows(&self) -> Result<Vec<RawRow>> {
        let body = self.fetch_body().await?;
        let rows = parse_body(&body, self.format)?;
        tracing::debug!(url = %self.url, rows = rows.len(), "Feed fetched");
        Ok(rows)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for `FeedConfig::Http`
pub struct HttpFeedFactory;

impl FeedSourceFactory for HttpFeedFactory {
    fn create(&self, config: &FeedConfig) -> Result<Box<dyn FeedSource>> {
        match config {
            FeedConfig::Http {
                url,
                format,
                timeout_secs,
            } => Ok(Box::new(HttpFeedSource::new(
                url.clone(),
                *format,
                Duration::from_secs(*timeout_secs),
            )?)),
            _ => Err(Error::config("Invalid config for HTTP feed")),
        }
    }
}

/// Register the HTTP feed with a registry
pub fn register(registry: &Registry) {
    registry.register_feed("http", Box::new(HttpFeedFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_creation() {
        let factory = HttpFeedFactory;
        assert!(factory.create(&FeedConfig::default()).is_ok());

        let custom = FeedConfig::Custom {
            factory: "other".to_string(),
            config: serde_json::json!({}),
        };
        assert!(factory.create(&custom).is_err());
    }

    #[test]
    fn test_register() {
        let registry = Registry::new();
        register(&registry);
        assert!(registry.has_feed("http"));
        assert!(registry.create_feed(&FeedConfig::default()).is_ok());
    }

    #[test]
    fn test_auto_detects_json() {
        let body = r#"  {"完整数据列表": {"电信": [{"优选IP": "1.1.1.1", "丢包": "0.00%"}]}}"#;
        let rows = parse_body(body, FeedFormat::Auto).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_auto_falls_back_to_html() {
        let body = "<table class=\"table-striped\"><tr><th>线路</th><th>优选IP</th></tr>\
                    <tr><td>电信</td><td>1.1.1.1</td></tr></table>";
        let rows = parse_body(body, FeedFormat::Auto).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&["优选ip"]), Some("1.1.1.1"));
    }

    #[test]
    fn test_forced_format_does_not_sniff() {
        assert!(parse_body("<table></table>", FeedFormat::Json).is_err());
    }
}
