// # cfbestd - edge IP selection driver
//
// Thin integration layer: reads configuration from the environment, installs
// logging, wires collaborators through the registry and runs the pipeline.
// Ranking, planning and apply logic all live in cfbest-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Feed
// - `CFBEST_FEED_URL`: Measurement page (default `https://api.uouin.com/cloudflare.html`)
// - `CFBEST_FEED_FORMAT`: `auto`, `html` or `json` (default `auto`)
// - `CFBEST_FEED_TIMEOUT_SECS`: Request timeout (default 20)
//
// ### DNS Provider
// - `CFBEST_PROVIDER_TYPE`: Provider type (`huawei`)
// - `CFBEST_PROVIDER_TOKEN`: API token
// - `CFBEST_ZONE_ID`: Zone id
// - `CFBEST_PROVIDER_ENDPOINT`: API endpoint override (optional)
//
// ### Records
// - `CFBEST_RECORD_NAME`: Record name, e.g. `cdn.example.com.`
// - `CFBEST_TTL`: Record TTL (default 1)
// - `CFBEST_DEFAULT_CAP`: Addresses per record set (default 2)
// - `CFBEST_{CT,CU,CM}_A_ID`, `CFBEST_{CT,CU,CM}_AAAA_ID`: Record set ids per line
// - `CFBEST_{CT,CU,CM}_CAP`: Per-line cap override
//
// ### Engine
// - `CFBEST_APPLY_MODE`: `sequential` or `concurrent` (default `concurrent`)
// - `CFBEST_STATE_PATH`: State file; enables skipping unchanged records
// - `CFBEST_REPORT_PATH`: Snapshot base path (`.json` and `.txt` are appended)
// - `CFBEST_REPORT_TEXT`: `true` to also write the text rendering
// - `CFBEST_INTERVAL_SECS`: Seconds between runs, 0 for a single pass (default 0)
// - `CFBEST_MODE`: `dry-run` to log writes instead of sending them
// - `CFBEST_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export CFBEST_PROVIDER_TOKEN=your_iam_token
// export CFBEST_ZONE_ID=ff8080826d0b...
// export CFBEST_RECORD_NAME=cdn.example.com.
// export CFBEST_CT_A_ID=ff80...01
// export CFBEST_CU_A_ID=ff80...02
// export CFBEST_CM_A_ID=ff80...03
// export CFBEST_INTERVAL_SECS=900
//
// cfbestd
// ```

use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use cfbest_core::config::{
    ApplyMode, EngineConfig, FeedFormat, ReportConfig, StateStoreConfig,
};
use cfbest_core::report::FileReportSink;
use cfbest_core::{
    CarrierKey, CfBestConfig, DnsConfig, EngineEvent, FeedConfig, LineConfig, Pipeline,
    ProviderConfig, Registry, RunReport,
};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_FEED_URL: &str = "https://api.uouin.com/cloudflare.html";

/// Process exit codes
///
/// - 0: Every pair applied, unchanged or skipped (or clean shutdown)
/// - 1: Configuration or startup error
/// - 2: Run aborted (feed unreachable or empty)
/// - 3: Run completed with at least one failed pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CfBestExitCode {
    Success = 0,
    ConfigError = 1,
    FatalRunError = 2,
    PartialFailure = 3,
}

impl From<CfBestExitCode> for ExitCode {
    fn from(code: CfBestExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl CfBestExitCode {
    fn for_run(result: &cfbest_core::Result<RunReport>) -> Self {
        match result {
            Ok(report) if report.is_success() => Self::Success,
            Ok(_) => Self::PartialFailure,
            Err(cfbest_core::Error::Config(_)) => Self::ConfigError,
            Err(_) => Self::FatalRunError,
        }
    }
}

/// Carrier lines and their environment prefixes
const LINES: [(CarrierKey, &str); 3] = [
    (CarrierKey::Telecom, "CT"),
    (CarrierKey::Unicom, "CU"),
    (CarrierKey::Mobile, "CM"),
];

/// Application configuration
struct Config {
    feed_url: String,
    feed_format: String,
    feed_timeout_secs: u64,
    provider_type: String,
    provider_token: String,
    zone_id: String,
    provider_endpoint: Option<String>,
    record_name: String,
    ttl: u32,
    default_cap: usize,
    lines: Vec<LineConfig>,
    apply_mode: String,
    state_path: Option<String>,
    report_path: Option<String>,
    report_text: bool,
    interval_secs: u64,
    dry_run: bool,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`; blank values count as unset
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut lines = Vec::new();
        for (carrier, prefix) in LINES {
            let a = var(&format!("CFBEST_{}_A_ID", prefix));
            let aaaa = var(&format!("CFBEST_{}_AAAA_ID", prefix));
            let cap = parse_var::<usize>(&format!("CFBEST_{}_CAP", prefix), &var)?;
            if a.is_none() && aaaa.is_none() && cap.is_none() {
                continue;
            }
            lines.push(LineConfig {
                carrier,
                a_record_id: a,
                aaaa_record_id: aaaa,
                cap,
            });
        }

        Ok(Self {
            feed_url: var("CFBEST_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            feed_format: var("CFBEST_FEED_FORMAT").unwrap_or_else(|| "auto".to_string()),
            feed_timeout_secs: parse_var("CFBEST_FEED_TIMEOUT_SECS", &var)?.unwrap_or(20),
            provider_type: var("CFBEST_PROVIDER_TYPE").unwrap_or_else(|| "huawei".to_string()),
            provider_token: var("CFBEST_PROVIDER_TOKEN").unwrap_or_default(),
            zone_id: var("CFBEST_ZONE_ID").unwrap_or_default(),
            provider_endpoint: var("CFBEST_PROVIDER_ENDPOINT"),
            record_name: var("CFBEST_RECORD_NAME").unwrap_or_default(),
            ttl: parse_var("CFBEST_TTL", &var)?.unwrap_or(1),
            default_cap: parse_var("CFBEST_DEFAULT_CAP", &var)?.unwrap_or(2),
            lines,
            apply_mode: var("CFBEST_APPLY_MODE").unwrap_or_else(|| "concurrent".to_string()),
            state_path: var("CFBEST_STATE_PATH"),
            report_path: var("CFBEST_REPORT_PATH"),
            report_text: parse_var("CFBEST_REPORT_TEXT", &var)?.unwrap_or(false),
            interval_secs: parse_var("CFBEST_INTERVAL_SECS", &var)?.unwrap_or(0),
            dry_run: var("CFBEST_MODE").is_some_and(|m| m.eq_ignore_ascii_case("dry-run")),
            log_level: var("CFBEST_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Driver-level checks first, then the core validation of the value this
    /// configuration builds.
    fn validate(&self) -> Result<()> {
        if self.provider_type != "huawei" {
            anyhow::bail!(
                "CFBEST_PROVIDER_TYPE '{}' is not supported. \
                Supported providers: huawei",
                self.provider_type
            );
        }

        if self.provider_token.is_empty() {
            anyhow::bail!(
                "CFBEST_PROVIDER_TOKEN is required. \
                Set it via: export CFBEST_PROVIDER_TOKEN=your_token"
            );
        }

        let token_lower = self.provider_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower == "token"
        {
            anyhow::bail!(
                "CFBEST_PROVIDER_TOKEN appears to be a placeholder. \
                Use an actual IAM token for the DNS service."
            );
        }

        if self.zone_id.is_empty() {
            anyhow::bail!("CFBEST_ZONE_ID is required");
        }

        if self.record_name.is_empty() {
            anyhow::bail!(
                "CFBEST_RECORD_NAME is required. \
                Set it via: export CFBEST_RECORD_NAME=cdn.example.com."
            );
        }

        if self.lines.iter().all(|line| line.a_record_id.is_none() && line.aaaa_record_id.is_none()) {
            anyhow::bail!(
                "No record set ids configured. \
                Set at least one of CFBEST_CT_A_ID, CFBEST_CU_A_ID, CFBEST_CM_A_ID \
                or their _AAAA_ID counterparts"
            );
        }

        if !self.feed_url.starts_with("https://") && !self.feed_url.starts_with("http://") {
            anyhow::bail!(
                "CFBEST_FEED_URL must use HTTP or HTTPS scheme. Got: {}",
                self.feed_url
            );
        }

        parse_feed_format(&self.feed_format)?;
        parse_apply_mode(&self.apply_mode)?;

        if !(1..=300).contains(&self.feed_timeout_secs) {
            anyhow::bail!(
                "CFBEST_FEED_TIMEOUT_SECS must be between 1 and 300 seconds. Got: {}",
                self.feed_timeout_secs
            );
        }

        if self.interval_secs != 0 && !(60..=86_400).contains(&self.interval_secs) {
            anyhow::bail!(
                "CFBEST_INTERVAL_SECS must be 0 (single pass) or between 60 and 86400 seconds. Got: {}",
                self.interval_secs
            );
        }

        if let Some(path) = &self.state_path
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "CFBEST_STATE_PATH parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "CFBEST_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.to_cfbest_config()?
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        Ok(())
    }

    /// Build the core configuration value
    fn to_cfbest_config(&self) -> Result<CfBestConfig> {
        let mut dns = DnsConfig::new(self.record_name.clone()).with_ttl(self.ttl);
        dns.default_cap = self.default_cap;
        dns.lines = self.lines.clone();

        Ok(CfBestConfig {
            feed: FeedConfig::Http {
                url: self.feed_url.clone(),
                format: parse_feed_format(&self.feed_format)?,
                timeout_secs: self.feed_timeout_secs,
            },
            provider: ProviderConfig::Huawei {
                auth_token: self.provider_token.clone(),
                zone_id: self.zone_id.clone(),
                endpoint: self.provider_endpoint.clone(),
            },
            dns,
            state_store: match &self.state_path {
                Some(path) => StateStoreConfig::File { path: path.clone() },
                None => StateStoreConfig::Memory,
            },
            report: self.report_path.as_ref().map(|path| ReportConfig {
                path: path.clone(),
                write_text: self.report_text,
            }),
            engine: EngineConfig {
                apply_mode: parse_apply_mode(&self.apply_mode)?,
                skip_unchanged: self.state_path.is_some(),
                ..EngineConfig::default()
            },
        })
    }

    fn tracing_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn parse_var<T>(name: &str, var: &impl Fn(&str) -> Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("{} has an invalid value: '{}'", name, value))
        })
        .transpose()
}

fn parse_feed_format(value: &str) -> Result<FeedFormat> {
    match value.to_lowercase().as_str() {
        "auto" => Ok(FeedFormat::Auto),
        "html" => Ok(FeedFormat::Html),
        "json" => Ok(FeedFormat::Json),
        _ => anyhow::bail!(
            "CFBEST_FEED_FORMAT '{}' is not valid. Valid formats: auto, html, json",
            value
        ),
    }
}

fn parse_apply_mode(value: &str) -> Result<ApplyMode> {
    match value.to_lowercase().as_str() {
        "sequential" => Ok(ApplyMode::Sequential),
        "concurrent" => Ok(ApplyMode::Concurrent),
        _ => anyhow::bail!(
            "CFBEST_APPLY_MODE '{}' is not valid. Valid modes: sequential, concurrent",
            value
        ),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return CfBestExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return CfBestExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.tracing_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return CfBestExitCode::ConfigError.into();
    }

    info!("Starting cfbestd");
    info!(
        "Configuration loaded: {} line(s), record {}",
        config.lines.len(),
        config.record_name
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return CfBestExitCode::ConfigError.into();
        }
    };

    let code = rt.block_on(async {
        match run_daemon(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Startup error: {:#}", e);
                CfBestExitCode::ConfigError
            }
        }
    });

    code.into()
}

/// Build the pipeline and run it once or on an interval
async fn run_daemon(config: Config) -> Result<CfBestExitCode> {
    let cfbest_config = config.to_cfbest_config()?;

    let registry = Registry::with_builtin_state_stores();

    #[cfg(feature = "huawei")]
    {
        info!("Registering Huawei Cloud DNS writer");
        cfbest_provider_huawei::register(&registry, config.dry_run);
    }

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP feed");
        cfbest_feed_http::register(&registry);
    }

    let feed = registry.create_feed(&cfbest_config.feed)?;
    let writer = registry.create_writer(&cfbest_config.provider)?;

    let (mut pipeline, events) = Pipeline::new(feed, writer, &cfbest_config)?;

    if config.state_path.is_some() {
        let store = registry
            .create_state_store(&cfbest_config.state_store)
            .await?;
        pipeline = pipeline.with_state_store(store);
    }

    if let Some(report) = &cfbest_config.report {
        pipeline = pipeline.with_report_sink(Box::new(FileReportSink::from_config(report)));
    }

    tokio::spawn(drain_events(events));

    if config.interval_secs == 0 {
        let result = pipeline.run_once().await;
        log_run(&result);
        return Ok(CfBestExitCode::for_run(&result));
    }

    info!("Running every {}s", config.interval_secs);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                match signal {
                    Ok(name) => info!("Received shutdown signal: {}", name),
                    Err(e) => error!("Shutdown error: {}", e),
                }
                break;
            }
            _ = ticker.tick() => {
                let result = pipeline.run_once().await;
                log_run(&result);
            }
        }
    }

    info!("Shutting down cfbestd");
    Ok(CfBestExitCode::Success)
}

fn log_run(result: &cfbest_core::Result<RunReport>) {
    match result {
        Ok(report) if report.is_success() => info!(
            "Run finished: {} applied, {} unchanged, {} skipped ({} of {} rows rejected)",
            report.applied_count(),
            report.unchanged_count(),
            report.skipped_count(),
            report.rows_skipped,
            report.rows_total
        ),
        Ok(report) => warn!(
            "Run finished with {} failed pair(s): {} applied, {} unchanged, {} skipped",
            report.failed_count(),
            report.applied_count(),
            report.unchanged_count(),
            report.skipped_count()
        ),
        Err(e) => error!("Run aborted: {}", e),
    }
}

/// Forward engine events to the log
///
/// The pipeline already logs every action; events add per-row detail at
/// debug level.
async fn drain_events(mut events: tokio::sync::mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::RowSkipped { index, error } => {
                tracing::debug!("Row {} skipped: {}", index, error);
            }
            other => tracing::trace!(event = ?other, "Engine event"),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
