//! Per-run report snapshot
//!
//! A [`RunSnapshot`] records what one run saw and chose: the active set per
//! carrier and every normalized row grouped by carrier in ranking order. It is
//! written for observability only; nothing reads it back.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReportConfig;
use crate::error::Error;
use crate::measurement::{AddressFamily, CarrierKey, MeasurementRow};
use crate::selection::{SelectionResult, rank_all};
use crate::state::{sibling, write_atomic};
use crate::traits::ReportSink;

/// Timestamp format used as the group header of the text rendering
const TEXT_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Active set of one carrier, per family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CarrierBest {
    pub ipv4: Vec<IpAddr>,
    pub ipv6: Vec<IpAddr>,
}

impl CarrierBest {
    fn from_selection(selection: &SelectionResult) -> Self {
        let family = |f| selection.get(f).map(<[IpAddr]>::to_vec).unwrap_or_default();
        Self {
            ipv4: family(AddressFamily::V4),
            ipv6: family(AddressFamily::V6),
        }
    }

    fn get(&self, family: AddressFamily) -> &[IpAddr] {
        match family {
            AddressFamily::V4 => &self.ipv4,
            AddressFamily::V6 => &self.ipv6,
        }
    }
}

/// Snapshot of one run, keyed by carrier code
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub generated_at: DateTime<Utc>,
    pub best_by_carrier: BTreeMap<String, CarrierBest>,
    pub full_by_carrier: BTreeMap<String, Vec<MeasurementRow>>,
}

impl RunSnapshot {
    /// Build a snapshot from the normalized rows and the selections of a run
    ///
    /// `rows` may include ineligible and unknown-carrier rows; they appear in
    /// `fullByCarrier` only.
    pub fn build(
        generated_at: DateTime<Utc>,
        rows: &[MeasurementRow],
        selections: &BTreeMap<CarrierKey, SelectionResult>,
    ) -> Self {
        let mut grouped: BTreeMap<CarrierKey, Vec<MeasurementRow>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.carrier).or_default().push(row.clone());
        }

        let full_by_carrier = grouped
            .into_iter()
            .map(|(carrier, rows)| (carrier.code().to_string(), rank_all(&rows)))
            .collect();

        let best_by_carrier = selections
            .iter()
            .map(|(carrier, selection)| {
                (carrier.code().to_string(), CarrierBest::from_selection(selection))
            })
            .collect();

        Self {
            generated_at,
            best_by_carrier,
            full_by_carrier,
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `address#label` lines grouped per carrier and family
    ///
    /// Each non-empty group is headed by the generation time and followed by a
    /// blank line. IPv6 addresses are bracketed.
    pub fn render_text(&self) -> String {
        let stamp = self.generated_at.format(TEXT_TIMESTAMP_FORMAT).to_string();
        let mut out = String::new();

        for carrier in CarrierKey::SELECTABLE {
            let Some(best) = self.best_by_carrier.get(carrier.code()) else {
                continue;
            };
            for family in AddressFamily::ALL {
                let addrs = best.get(family);
                if addrs.is_empty() {
                    continue;
                }
                let _ = writeln!(out, "{stamp}");
                for addr in addrs {
                    match addr {
                        IpAddr::V4(v4) => {
                            let _ = writeln!(out, "{}#{}", v4, carrier.label());
                        }
                        IpAddr::V6(v6) => {
                            let _ = writeln!(out, "[{}]#{}", v6, carrier.label());
                        }
                    }
                }
                out.push('\n');
            }
        }

        out
    }
}

/// Writes snapshots to `<path>.json` and optionally `<path>.txt`
#[derive(Debug, Clone)]
pub struct FileReportSink {
    base: PathBuf,
    write_text: bool,
}

impl FileReportSink {
    pub fn new(base: impl Into<PathBuf>, write_text: bool) -> Self {
        Self {
            base: base.into(),
            write_text,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(&config.path, config.write_text)
    }

    /// `<base>.json`; dots already in the base name are kept
    pub fn json_path(&self) -> PathBuf {
        sibling(&self.base, "json")
    }

    pub fn text_path(&self) -> PathBuf {
        sibling(&self.base, "txt")
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn write(&self, snapshot: &RunSnapshot) -> Result<(), Error> {
        if let Some(parent) = self.base.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json_path = self.json_path();
        write_atomic(&json_path, snapshot.to_json()?.as_bytes(), false)
            .await
            .map_err(|e| Error::report(format!("{}: {}", json_path.display(), e)))?;

        if self.write_text {
            let text_path = self.text_path();
            write_atomic(&text_path, snapshot.render_text().as_bytes(), false)
                .await
                .map_err(|e| Error::report(format!("{}: {}", text_path.display(), e)))?;
        }

        tracing::debug!(path = %json_path.display(), "Run snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::selection::select_all;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn row(ip: &str, carrier: CarrierKey, latency: f64, loss: f64) -> MeasurementRow {
        MeasurementRow {
            address: ip.parse().unwrap(),
            carrier,
            latency_ms: latency,
            throughput_mbps: 10.0,
            packet_loss_percent: loss,
            bandwidth: "100M".to_string(),
            observed_at: String::new(),
        }
    }

    fn snapshot() -> RunSnapshot {
        let rows = vec![
            row("1.1.1.2", CarrierKey::Telecom, 50.0, 0.0),
            row("1.1.1.1", CarrierKey::Telecom, 40.0, 0.0),
            row("1.1.1.9", CarrierKey::Telecom, 10.0, 3.0),
            row("2606:4700::1", CarrierKey::Telecom, 30.0, 0.0),
            row("3.3.3.3", CarrierKey::Unknown, 5.0, 0.0),
        ];
        let selections = select_all(&aggregate(rows.clone()), |_| 2);
        let at = Utc.with_ymd_and_hms(2025, 1, 9, 12, 0, 0).unwrap();
        RunSnapshot::build(at, &rows, &selections)
    }

    #[test]
    fn test_best_and_full_by_carrier() {
        let snap = snapshot();

        let best = &snap.best_by_carrier["ct"];
        assert_eq!(best.ipv4, vec!["1.1.1.1".parse::<IpAddr>().unwrap(), "1.1.1.2".parse().unwrap()]);
        assert_eq!(best.ipv6.len(), 1);
        assert!(!snap.best_by_carrier.contains_key("unknown"));

        let full: Vec<String> = snap.full_by_carrier["ct"]
            .iter()
            .map(|r| r.address.to_string())
            .collect();
        assert_eq!(full, ["1.1.1.9", "2606:4700::1", "1.1.1.1", "1.1.1.2"]);
        assert_eq!(snap.full_by_carrier["unknown"].len(), 1);
    }

    #[test]
    fn test_json_is_camel_case() {
        let json: serde_json::Value = serde_json::from_str(&snapshot().to_json().unwrap()).unwrap();
        assert!(json.get("generatedAt").is_some());
        assert!(json["bestByCarrier"]["ct"]["ipv4"].is_array());
        assert_eq!(json["fullByCarrier"]["ct"][0]["packetLossPercent"], 3.0);
    }

    #[test]
    fn test_render_text_groups() {
        let text = snapshot().render_text();
        let expected = "2025/01/09 12:00:00\n\
                        1.1.1.1#电信\n\
                        1.1.1.2#电信\n\
                        \n\
                        2025/01/09 12:00:00\n\
                        [2606:4700::1]#电信\n\
                        \n";
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn test_file_sink_writes_both_files() {
        let dir = tempdir().unwrap();
        let sink = FileReportSink::new(dir.path().join("out").join("bestip"), true);

        sink.write(&snapshot()).await.unwrap();

        let json = tokio::fs::read_to_string(sink.json_path()).await.unwrap();
        assert!(json.contains("\"bestByCarrier\""));
        let text = tokio::fs::read_to_string(sink.text_path()).await.unwrap();
        assert!(text.contains("1.1.1.1#电信"));
    }

    #[tokio::test]
    async fn test_file_sink_text_disabled() {
        let dir = tempdir().unwrap();
        let sink = FileReportSink::new(dir.path().join("bestip"), false);

        sink.write(&snapshot()).await.unwrap();

        assert!(sink.json_path().exists());
        assert!(!sink.text_path().exists());
    }

    #[test]
    fn test_paths_append_to_dotted_base() {
        let sink = FileReportSink::new("/var/lib/cfbest/cdn.example.com", true);
        assert_eq!(sink.json_path(), PathBuf::from("/var/lib/cfbest/cdn.example.com.json"));
        assert_eq!(sink.text_path(), PathBuf::from("/var/lib/cfbest/cdn.example.com.txt"));
    }
}
