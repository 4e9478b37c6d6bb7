//! Test doubles and common utilities for contract tests
//!
//! Minimal collaborators that record what the pipeline asks of them.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cfbest_core::config::{
    CfBestConfig, DnsConfig, EngineConfig, FeedConfig, LineConfig, ProviderConfig,
    StateStoreConfig,
};
use cfbest_core::error::{Error, Result};
use cfbest_core::measurement::{CarrierKey, RawRow};
use cfbest_core::planner::RecordType;
use cfbest_core::traits::{Ack, DnsRecordWriter, FeedSource};

/// Feed that returns the same rows on every fetch
#[derive(Clone, Default)]
pub struct StaticFeedSource {
    rows: Vec<RawRow>,
    fetch_count: Arc<AtomicUsize>,
}

impl StaticFeedSource {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            rows,
            fetch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch_rows(&self) -> Result<Vec<RawRow>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.clone())
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}

/// Feed whose every fetch fails
pub struct FailingFeedSource;

#[async_trait::async_trait]
impl FeedSource for FailingFeedSource {
    async fn fetch_rows(&self) -> Result<Vec<RawRow>> {
        Err(Error::fetch("connection refused"))
    }

    fn source_name(&self) -> &'static str {
        "failing"
    }
}

/// One writer call as seen by [`RecordingWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub record_id: String,
    pub record_type: RecordType,
    pub name: String,
    pub ttl: u32,
    pub values: Vec<String>,
}

#[derive(Default)]
struct WriterState {
    calls: Mutex<Vec<WriteCall>>,
    fail_calls: Mutex<HashSet<usize>>,
    fail_records: Mutex<HashSet<String>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight_per_record: AtomicUsize,
    max_in_flight_total: AtomicUsize,
    total_in_flight: AtomicUsize,
    call_counter: AtomicUsize,
}

/// Writer that records every call and can be told to fail some of them
///
/// Clones share state, so a test can keep one handle while the pipeline owns
/// another.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    state: Arc<WriterState>,
    delay: Option<Duration>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every call, to give concurrent calls a chance to overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the n-th call (0-based, in arrival order)
    pub fn fail_call(self, n: usize) -> Self {
        self.state.fail_calls.lock().unwrap().insert(n);
        self
    }

    /// Fail every call for a record id
    pub fn fail_record(self, record_id: &str) -> Self {
        self.state
            .fail_records
            .lock()
            .unwrap()
            .insert(record_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    /// Highest number of simultaneous calls observed for any one record id
    pub fn max_in_flight_per_record(&self) -> usize {
        self.state.max_in_flight_per_record.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed overall
    pub fn max_in_flight_total(&self) -> usize {
        self.state.max_in_flight_total.load(Ordering::SeqCst)
    }

    fn enter(&self, record_id: &str) {
        let mut in_flight = self.state.in_flight.lock().unwrap();
        let count = in_flight.entry(record_id.to_string()).or_insert(0);
        *count += 1;
        self.state
            .max_in_flight_per_record
            .fetch_max(*count, Ordering::SeqCst);

        let total = self.state.total_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight_total.fetch_max(total, Ordering::SeqCst);
    }

    fn leave(&self, record_id: &str) {
        let mut in_flight = self.state.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(record_id) {
            *count -= 1;
        }
        self.state.total_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DnsRecordWriter for RecordingWriter {
    async fn upsert(
        &self,
        record_id: &str,
        record_type: RecordType,
        name: &str,
        ttl: u32,
        values: &[String],
    ) -> Result<Ack> {
        let n = self.state.call_counter.fetch_add(1, Ordering::SeqCst);
        self.enter(record_id);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.state.calls.lock().unwrap().push(WriteCall {
            record_id: record_id.to_string(),
            record_type,
            name: name.to_string(),
            ttl,
            values: values.to_vec(),
        });

        self.leave(record_id);

        let fail = self.state.fail_calls.lock().unwrap().contains(&n)
            || self.state.fail_records.lock().unwrap().contains(record_id);
        if fail {
            return Err(Error::remote("recording", "HTTP 500: injected failure"));
        }

        Ok(Ack {
            record_id: record_id.to_string(),
            values: values.to_vec(),
            dry_run: false,
        })
    }

    fn writer_name(&self) -> &'static str {
        "recording"
    }
}

/// Raw row with the feed's native column names
pub fn raw_row(ip: &str, line: &str, loss: &str, latency: &str, speed: &str) -> RawRow {
    RawRow::new()
        .with("优选IP", ip)
        .with("线路", line)
        .with("丢包", loss)
        .with("延迟", latency)
        .with("速度", speed)
        .with("带宽", "100M")
        .with("时间", "2025/01/09 12:00:00")
}

/// DNS config with A and AAAA records for all three carriers
///
/// Record ids follow `<code>-a` / `<code>-aaaa`.
pub fn full_dns(cap: usize) -> DnsConfig {
    let mut dns = DnsConfig::new("cdn.example.com.").with_ttl(60);
    dns.default_cap = cap;
    for carrier in CarrierKey::SELECTABLE {
        dns = dns.with_line(
            LineConfig::new(carrier)
                .with_a(format!("{}-a", carrier.code()))
                .with_aaaa(format!("{}-aaaa", carrier.code())),
        );
    }
    dns
}

/// Minimal valid configuration around a DNS section
pub fn minimal_config(dns: DnsConfig) -> CfBestConfig {
    CfBestConfig {
        feed: FeedConfig::Custom {
            factory: "static".to_string(),
            config: serde_json::json!({}),
        },
        provider: ProviderConfig::Custom {
            factory: "recording".to_string(),
            config: serde_json::json!({}),
        },
        dns,
        state_store: StateStoreConfig::Memory,
        report: None,
        engine: EngineConfig::default(),
    }
}
