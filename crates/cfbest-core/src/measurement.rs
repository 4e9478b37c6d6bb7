//! Measurement normalizer
//!
//! Turns loosely structured feed rows (text with units, bilingual carrier
//! names, bracketed IPv6 literals) into typed [`MeasurementRow`]s.
//!
//! Numeric columns degrade instead of failing: an unreadable latency becomes
//! [`LATENCY_SENTINEL_MS`] and an unreadable throughput becomes
//! [`THROUGHPUT_DEFAULT_MBPS`], so one malformed cell never aborts a batch.
//! Packet loss is the exception because eligibility depends on it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ParseError;

/// Latency recorded when the latency cell cannot be parsed
pub const LATENCY_SENTINEL_MS: f64 = f64::INFINITY;

/// Throughput recorded when the throughput cell cannot be parsed
pub const THROUGHPUT_DEFAULT_MBPS: f64 = 0.0;

/// Unit suffixes stripped from numeric cells, longest first
const UNIT_SUFFIXES: &[&str] = &["mb/s", "mbps", "ms", "%"];

const ADDRESS_COLUMNS: &[&str] = &["优选ip", "ip", "address"];
const CARRIER_COLUMNS: &[&str] = &["线路", "line", "carrier", "isp"];
const LOSS_COLUMNS: &[&str] = &["丢包", "loss", "packet_loss"];
const LATENCY_COLUMNS: &[&str] = &["延迟", "latency", "delay"];
const THROUGHPUT_COLUMNS: &[&str] = &["速度", "speed", "throughput"];
const BANDWIDTH_COLUMNS: &[&str] = &["带宽", "bandwidth"];
const OBSERVED_AT_COLUMNS: &[&str] = &["时间", "time", "observed_at"];

/// Network carrier a measurement was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierKey {
    Telecom,
    Unicom,
    Mobile,
    /// Retained in the dataset, never selected
    Unknown,
}

impl CarrierKey {
    /// Carriers that take part in selection
    pub const SELECTABLE: [CarrierKey; 3] = [Self::Telecom, Self::Unicom, Self::Mobile];

    /// Short operator code (`ct`, `cu`, `cm`)
    pub fn code(self) -> &'static str {
        match self {
            Self::Telecom => "ct",
            Self::Unicom => "cu",
            Self::Mobile => "cm",
            Self::Unknown => "unknown",
        }
    }

    /// Native line label as published by the feed and the DNS provider
    pub fn label(self) -> &'static str {
        match self {
            Self::Telecom => "电信",
            Self::Unicom => "联通",
            Self::Mobile => "移动",
            Self::Unknown => "默认",
        }
    }

    pub fn is_selectable(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for CarrierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Telecom => "telecom",
            Self::Unicom => "unicom",
            Self::Mobile => "mobile",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// IPv4 or IPv6
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    #[serde(rename = "ipv4")]
    V4,
    #[serde(rename = "ipv6")]
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [Self::V4, Self::V6];

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("ipv4"),
            Self::V6 => f.write_str("ipv6"),
        }
    }
}

/// Synonym table mapping free-form carrier text to a [`CarrierKey`]
///
/// Built once per process; lookups are case and whitespace insensitive.
/// The reverse direction (key to names) is served by [`CarrierTable::synonyms`]
/// together with [`CarrierKey::code`] and [`CarrierKey::label`].
#[derive(Debug)]
pub struct CarrierTable {
    by_synonym: HashMap<String, CarrierKey>,
    by_key: BTreeMap<CarrierKey, Vec<&'static str>>,
}

static CARRIER_TABLE: LazyLock<CarrierTable> = LazyLock::new(CarrierTable::builtin);

impl CarrierTable {
    /// Build a table from `(synonym, key)` pairs
    pub fn from_pairs(pairs: &[(&'static str, CarrierKey)]) -> Self {
        let mut by_synonym = HashMap::with_capacity(pairs.len());
        let mut by_key: BTreeMap<CarrierKey, Vec<&'static str>> = BTreeMap::new();
        for (synonym, key) in pairs {
            by_synonym.insert(fold(synonym), *key);
            by_key.entry(*key).or_default().push(*synonym);
        }
        Self { by_synonym, by_key }
    }

    fn builtin() -> Self {
        use CarrierKey::*;
        Self::from_pairs(&[
            ("电信", Telecom),
            ("中国电信", Telecom),
            ("ct", Telecom),
            ("telecom", Telecom),
            ("chinanet", Telecom),
            ("dianxin", Telecom),
            ("联通", Unicom),
            ("中国联通", Unicom),
            ("cu", Unicom),
            ("unicom", Unicom),
            ("liantong", Unicom),
            ("移动", Mobile),
            ("中国移动", Mobile),
            ("cm", Mobile),
            ("cmcc", Mobile),
            ("mobile", Mobile),
            ("yidong", Mobile),
        ])
    }

    /// The process-wide built-in table
    pub fn global() -> &'static Self {
        &CARRIER_TABLE
    }

    /// Resolve carrier text; anything unrecognised is [`CarrierKey::Unknown`]
    pub fn lookup(&self, text: &str) -> CarrierKey {
        self.by_synonym
            .get(&fold(text))
            .copied()
            .unwrap_or(CarrierKey::Unknown)
    }

    /// All synonyms registered for a key
    pub fn synonyms(&self, key: CarrierKey) -> &[&'static str] {
        self.by_key.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Lowercase and drop every whitespace character (including U+3000)
fn fold(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn trim_cell(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace())
}

/// One raw feed row: column name to cell text
///
/// Column names are matched case-insensitively against a fixed alias list,
/// so both the native (`优选IP`, `丢包`) and English (`ip`, `loss`) headers work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow {
    fields: BTreeMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(column.into(), value.into());
    }

    /// Whether any of the aliases is present as a column
    pub fn has_any(&self, aliases: &[&str]) -> bool {
        self.get(aliases).is_some()
    }

    /// First non-empty cell whose column matches one of the aliases
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        self.fields.iter().find_map(|(column, value)| {
            let column = fold(column);
            aliases
                .iter()
                .any(|alias| *alias == column)
                .then(|| trim_cell(value))
                .filter(|v| !v.is_empty())
        })
    }

    /// Build a row from an already-structured JSON object
    ///
    /// Strings are taken verbatim, numbers and booleans via their JSON text.
    /// Nested values and nulls are ignored.
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        use serde_json::Value;

        let mut row = Self::new();
        for (column, value) in object {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => continue,
            };
            row.insert(column.clone(), text);
        }
        row
    }

    /// Set the carrier column when the row carries none
    pub fn with_default_carrier(mut self, carrier: &str) -> Self {
        if !self.has_any(CARRIER_COLUMNS) {
            self.insert("线路", carrier);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Self::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// One normalized edge IP sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRow {
    pub address: IpAddr,
    pub carrier: CarrierKey,
    /// `+inf` when unreadable (serialized as `null`)
    pub latency_ms: f64,
    pub throughput_mbps: f64,
    pub packet_loss_percent: f64,
    pub bandwidth: String,
    pub observed_at: String,
}

impl MeasurementRow {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }

    /// Only rows with zero measured packet loss are candidates
    pub fn is_eligible(&self) -> bool {
        self.packet_loss_percent == 0.0
    }
}

/// Parse a numeric cell after stripping a known unit suffix
///
/// Returns `None` for anything that is not a finite, non-negative number.
pub fn parse_measure(text: &str) -> Option<f64> {
    let lowered = trim_cell(text).to_lowercase();
    let mut value = lowered.as_str();
    for suffix in UNIT_SUFFIXES {
        if let Some(stripped) = value.strip_suffix(suffix) {
            value = trim_cell(stripped);
            break;
        }
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse an IPv4 or IPv6 literal, tolerating surrounding brackets
pub fn parse_address(text: &str) -> Option<IpAddr> {
    let text = trim_cell(text);
    let text = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    text.parse().ok()
}

/// A row the normalizer rejected, with its position in the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSkip {
    pub index: usize,
    pub error: ParseError,
}

/// Result of normalizing a whole batch
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub rows: Vec<MeasurementRow>,
    pub skipped: Vec<RowSkip>,
}

/// Converts raw rows into [`MeasurementRow`]s
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    carriers: &'static CarrierTable,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Normalizer backed by the built-in carrier table
    pub fn new() -> Self {
        Self {
            carriers: CarrierTable::global(),
        }
    }

    /// Normalizer backed by a custom carrier table
    pub fn with_table(carriers: &'static CarrierTable) -> Self {
        Self { carriers }
    }

    /// Normalize one row
    pub fn normalize(&self, raw: &RawRow) -> Result<MeasurementRow, ParseError> {
        let address_text = raw
            .get(ADDRESS_COLUMNS)
            .ok_or_else(|| ParseError::missing("address"))?;
        let address =
            parse_address(address_text).ok_or_else(|| ParseError::invalid_address(address_text))?;

        let loss_text = raw
            .get(LOSS_COLUMNS)
            .ok_or_else(|| ParseError::missing("loss"))?;
        let packet_loss_percent = parse_measure(loss_text)
            .filter(|loss| *loss <= 100.0)
            .ok_or_else(|| ParseError::malformed("loss", loss_text))?;

        let carrier = raw
            .get(CARRIER_COLUMNS)
            .map(|text| self.carriers.lookup(text))
            .unwrap_or(CarrierKey::Unknown);

        let latency_ms = raw
            .get(LATENCY_COLUMNS)
            .and_then(parse_measure)
            .unwrap_or(LATENCY_SENTINEL_MS);

        let throughput_mbps = raw
            .get(THROUGHPUT_COLUMNS)
            .and_then(parse_measure)
            .unwrap_or(THROUGHPUT_DEFAULT_MBPS);

        Ok(MeasurementRow {
            address,
            carrier,
            latency_ms,
            throughput_mbps,
            packet_loss_percent,
            bandwidth: raw.get(BANDWIDTH_COLUMNS).unwrap_or_default().to_string(),
            observed_at: raw.get(OBSERVED_AT_COLUMNS).unwrap_or_default().to_string(),
        })
    }

    /// Normalize a batch, skipping (and recording) rows that fail
    pub fn normalize_batch<'a, I>(&self, rows: I) -> NormalizedBatch
    where
        I: IntoIterator<Item = &'a RawRow>,
    {
        let mut batch = NormalizedBatch::default();
        for (index, raw) in rows.into_iter().enumerate() {
            match self.normalize(raw) {
                Ok(row) => batch.rows.push(row),
                Err(error) => {
                    debug!("Skipping feed row {}: {}", index, error);
                    batch.skipped.push(RowSkip { index, error });
                }
            }
        }
        batch
    }
}
