//! Configuration types for the cfbest pipeline
//!
//! Every component receives an explicit, immutable value from this module at
//! construction. Nothing in the core reads the environment.

use serde::{Deserialize, Serialize};

use crate::measurement::{AddressFamily, CarrierKey};

/// Upper bound on addresses per record set
pub const MAX_CAP: usize = 50;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfBestConfig {
    /// Measurement feed
    pub feed: FeedConfig,

    /// DNS record writer
    pub provider: ProviderConfig,

    /// Destination records and caps
    pub dns: DnsConfig,

    /// Applied-state cache backing `engine.skip_unchanged`
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional snapshot output
    #[serde(default)]
    pub report: Option<ReportConfig>,

    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl CfBestConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.feed.validate()?;
        self.provider.validate()?;
        self.dns.validate()?;
        if let Some(report) = &self.report
            && report.path.is_empty()
        {
            return Err(crate::Error::config("Report path cannot be empty"));
        }
        if self.engine.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

/// Feed source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedConfig {
    /// Public measurement page fetched over HTTP
    Http {
        url: String,
        #[serde(default)]
        format: FeedFormat,
        #[serde(default = "default_feed_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom feed source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            FeedConfig::Http {
                url, timeout_secs, ..
            } => {
                if url.is_empty() {
                    return Err(crate::Error::config("Feed URL cannot be empty"));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Feed timeout must be > 0"));
                }
                Ok(())
            }
            FeedConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom feed factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom feed config cannot be null"));
                }
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            FeedConfig::Http { .. } => "http",
            FeedConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig::Http {
            url: "https://api.uouin.com/cloudflare.html".to_string(),
            format: FeedFormat::Auto,
            timeout_secs: default_feed_timeout_secs(),
        }
    }
}

/// Body format of the measurement page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// Sniff the body: JSON if it parses as an object, else HTML
    #[default]
    Auto,
    Html,
    Json,
}

fn default_feed_timeout_secs() -> u64 {
    20
}

/// DNS writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Huawei Cloud DNS (record-set API)
    Huawei {
        /// API auth token
        auth_token: String,
        /// Public zone id
        zone_id: String,
        /// API endpoint override
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// Custom writer
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Huawei {
                auth_token,
                zone_id,
                ..
            } => {
                if auth_token.is_empty() {
                    return Err(crate::Error::config("Huawei auth token cannot be empty"));
                }
                if zone_id.is_empty() {
                    return Err(crate::Error::config("Huawei zone id cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Huawei { .. } => "huawei",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Applied-state cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// JSON file
    File { path: String },

    /// In-memory (lost between processes)
    #[default]
    Memory,

    /// Custom state store
    Custom {
        factory: String,
        config: serde_json::Value,
    },
}

impl StateStoreConfig {
    pub fn type_name(&self) -> &str {
        match self {
            StateStoreConfig::File { .. } => "file",
            StateStoreConfig::Memory => "memory",
            StateStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Snapshot output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Base path; `.json` (and `.txt`) are appended to it
    pub path: String,
    /// Also write the `address#label` text rendering next to it
    #[serde(default)]
    pub write_text: bool,
}

/// Destination record set configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Fully qualified record name, e.g. `cdn.example.com.`
    pub record_name: String,

    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Cap for carriers without their own line entry
    #[serde(default = "default_cap")]
    pub default_cap: usize,

    #[serde(default)]
    pub lines: Vec<LineConfig>,
}

impl DnsConfig {
    pub fn new(record_name: impl Into<String>) -> Self {
        Self {
            record_name: record_name.into(),
            ttl: default_ttl(),
            default_cap: default_cap(),
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: LineConfig) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn line(&self, carrier: CarrierKey) -> Option<&LineConfig> {
        self.lines.iter().find(|line| line.carrier == carrier)
    }

    /// Active-set size for a carrier
    pub fn cap_for(&self, carrier: CarrierKey) -> usize {
        self.line(carrier)
            .and_then(|line| line.cap)
            .unwrap_or(self.default_cap)
    }

    /// Destination record id for a pair, if one is configured
    pub fn record_id(&self, carrier: CarrierKey, family: AddressFamily) -> Option<&str> {
        self.line(carrier)
            .and_then(|line| line.record_id(family))
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.record_name.trim().is_empty() {
            return Err(crate::Error::config("DNS record name cannot be empty"));
        }
        if self.ttl == 0 {
            return Err(crate::Error::config("TTL must be > 0"));
        }
        validate_cap(self.default_cap)?;

        let mut seen = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            if !line.carrier.is_selectable() {
                return Err(crate::Error::config("Line carrier cannot be 'unknown'"));
            }
            if seen.contains(&line.carrier) {
                return Err(crate::Error::config(format!(
                    "Duplicate line configuration for carrier {}",
                    line.carrier
                )));
            }
            seen.push(line.carrier);
            if let Some(cap) = line.cap {
                validate_cap(cap)?;
            }
        }
        Ok(())
    }
}

fn validate_cap(cap: usize) -> Result<(), crate::Error> {
    if cap == 0 || cap > MAX_CAP {
        return Err(crate::Error::config(format!(
            "Cap must be between 1 and {}. Got: {}",
            MAX_CAP, cap
        )));
    }
    Ok(())
}

fn default_ttl() -> u32 {
    1
}

fn default_cap() -> usize {
    2
}

/// One carrier line: where its A / AAAA selections are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    pub carrier: CarrierKey,

    #[serde(default)]
    pub a_record_id: Option<String>,

    #[serde(default)]
    pub aaaa_record_id: Option<String>,

    /// Overrides `DnsConfig::default_cap`
    #[serde(default)]
    pub cap: Option<usize>,
}

impl LineConfig {
    pub fn new(carrier: CarrierKey) -> Self {
        Self {
            carrier,
            a_record_id: None,
            aaaa_record_id: None,
            cap: None,
        }
    }

    pub fn with_a(mut self, id: impl Into<String>) -> Self {
        self.a_record_id = Some(id.into());
        self
    }

    pub fn with_aaaa(mut self, id: impl Into<String>) -> Self {
        self.aaaa_record_id = Some(id.into());
        self
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Record id for a family; blank ids count as missing
    pub fn record_id(&self, family: AddressFamily) -> Option<&str> {
        let id = match family {
            AddressFamily::V4 => self.a_record_id.as_deref(),
            AddressFamily::V6 => self.aaaa_record_id.as_deref(),
        };
        id.map(str::trim).filter(|id| !id.is_empty())
    }
}

/// How the apply executor schedules writer calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// One action at a time, in plan order
    Sequential,
    /// One task per destination record id
    #[default]
    Concurrent,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub apply_mode: ApplyMode,

    /// Skip writes whose value list equals the last successfully applied one
    #[serde(default)]
    pub skip_unchanged: bool,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped with a warning.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            apply_mode: ApplyMode::default(),
            skip_unchanged: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}
