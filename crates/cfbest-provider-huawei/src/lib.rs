// # Huawei Cloud DNS Record Writer
//
// `DnsRecordWriter` implementation for the Huawei Cloud DNS v2 record-set API.
// Huawei models carrier lines as separate record sets (line `Dianxin`,
// `Liantong`, `Yidong`), each with its own id, so one upsert overwrites the
// value list of exactly one (carrier, family) pair.
//
// ## Behavior
//
// - One `PUT /v2/zones/{zone_id}/recordsets/{recordset_id}` per call
// - Full overwrite of `records`; the body carries no timestamp, so equal
//   inputs produce equal requests
// - Status codes mapped to actionable `Error::Remote` messages
// - Dry-run mode logs the body and skips the request
// - No retry, backoff or caching: the executor records the error and the
//   next run tries again
//
// ## Security
//
// - The auth token never appears in logs or `Debug` output
// - Construction fails on an empty token instead of panicking
//
// ## API Reference
//
// - Update record set: PUT `https://dns.myhuaweicloud.com/v2/zones/{zone_id}/recordsets/{recordset_id}`
// - Auth: `X-Auth-Token` header (IAM token)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use cfbest_core::Registry;
use cfbest_core::config::ProviderConfig;
use cfbest_core::planner::{RecordType, record_payload};
use cfbest_core::traits::{Ack, DnsRecordWriter, DnsRecordWriterFactory};
use cfbest_core::{Error, Result};

/// Public API endpoint
pub const HUAWEI_DNS_ENDPOINT: &str = "https://dns.myhuaweicloud.com";

/// HTTP timeout per request
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const WRITER_NAME: &str = "huawei";

/// Huawei Cloud DNS writer
///
/// # Dry-Run Mode
///
/// With `dry_run`, `upsert` logs the request it would send and returns an
/// [`Ack`] flagged `dry_run` without touching the API.
pub struct HuaweiWriter {
    /// ⚠️ NEVER log this value
    auth_token: String,
    zone_id: String,
    endpoint: String,
    client: reqwest::Client,
    dry_run: bool,
}

impl std::fmt::Debug for HuaweiWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuaweiWriter")
            .field("auth_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("endpoint", &self.endpoint)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl HuaweiWriter {
    /// Create a writer
    ///
    /// `endpoint` defaults to [`HUAWEI_DNS_ENDPOINT`].
    pub fn new(
        auth_token: impl Into<String>,
        zone_id: impl Into<String>,
        endpoint: Option<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let auth_token = auth_token.into();
        if auth_token.is_empty() {
            return Err(Error::config("Huawei auth token cannot be empty"));
        }
        let zone_id = zone_id.into();
        if zone_id.is_empty() {
            return Err(Error::config("Huawei zone id cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = endpoint
            .unwrap_or_else(|| HUAWEI_DNS_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            auth_token,
            zone_id,
            endpoint,
            client,
            dry_run,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn recordset_url(&self, record_id: &str) -> String {
        format!(
            "{}/v2/zones/{}/recordsets/{}",
            self.endpoint, self.zone_id, record_id
        )
    }
}

/// Map a non-success status to a remote error
fn status_error(status: StatusCode, record_id: &str, body: &str) -> Error {
    let message = match status.as_u16() {
        401 | 403 => format!(
            "Authentication failed: invalid or expired token, or missing DNS permissions. Status: {}",
            status
        ),
        404 => format!(
            "Record set {} not found in zone. Check the configured record ids. Status: {}",
            record_id, status
        ),
        409 => format!("Conflict: record set {} is being modified. Status: {}", record_id, status),
        429 => format!("Rate limit exceeded. Please retry later. Status: {}", status),
        500..=599 => format!("Huawei server error (transient): {} - {}", status, body),
        _ => format!("Failed to update record set {}: {} - {}", record_id, status, body),
    };
    Error::remote(WRITER_NAME, message)
}

#[async_trait]
impl DnsRecordWriter for HuaweiWriter {
    async fn upsert(
        &self,
        record_id: &str,
        record_type: RecordType,
        name: &str,
        ttl: u32,
        values: &[String],
    ) -> Result<Ack> {
        let url = self.recordset_url(record_id);
        let body = record_payload(record_type, name, ttl, values);

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would PUT {}: {}", url, body);
            return Ok(Ack {
                record_id: record_id.to_string(),
                values: values.to_vec(),
                dry_run: true,
            });
        }

        tracing::debug!("PUT {} ({} {} values)", url, record_type, values.len());

        let response = self
            .client
            .put(&url)
            .header("X-Auth-Token", &self.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::remote(WRITER_NAME, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status, record_id, &error_text));
        }

        Ok(Ack {
            record_id: record_id.to_string(),
            values: values.to_vec(),
            dry_run: false,
        })
    }

    fn writer_name(&self) -> &'static str {
        WRITER_NAME
    }
}

/// Factory for `ProviderConfig::Huawei`
///
/// Dry-run is a property of the factory so that the driver decides it once
/// from its own configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct HuaweiFactory {
    dry_run: bool,
}

impl HuaweiFactory {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl DnsRecordWriterFactory for HuaweiFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsRecordWriter>> {
        match config {
            ProviderConfig::Huawei {
                auth_token,
                zone_id,
                endpoint,
            } => {
                if self.dry_run {
                    tracing::warn!("Huawei writer running in DRY-RUN mode - no changes will be made");
                }
                Ok(Box::new(HuaweiWriter::new(
                    auth_token.clone(),
                    zone_id.clone(),
                    endpoint.clone(),
                    self.dry_run,
                )?))
            }
            _ => Err(Error::config("Invalid config for Huawei writer")),
        }
    }
}

/// Register the Huawei writer with a registry
///
/// # Example
///
/// ```rust
/// use cfbest_core::Registry;
///
/// let registry = Registry::new();
/// cfbest_provider_huawei::register(&registry, false);
/// assert!(registry.has_writer("huawei"));
/// ```
pub fn register(registry: &Registry, dry_run: bool) {
    registry.register_writer(WRITER_NAME, Box::new(HuaweiFactory::new(dry_run)));
}
