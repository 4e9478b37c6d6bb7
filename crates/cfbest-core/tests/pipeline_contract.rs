//! Contract Test: Pipeline Data Flow
//!
//! Constraints verified:
//! - A carrier without eligible rows gets no write, other carriers still do
//! - Malformed rows are skipped and counted, never fatal
//! - Only a failed or empty feed aborts the run
//! - Writes carry the rank-ordered value list and configured record metadata
//! - Events describe the run in order

mod common;

use cfbest_core::measurement::{AddressFamily, CarrierKey, RawRow};
use cfbest_core::planner::{RecordType, SkipReason};
use cfbest_core::report::FileReportSink;
use cfbest_core::{EngineEvent, Error, PairStatus, Pipeline};
use common::*;

fn sample_feed() -> StaticFeedSource {
    StaticFeedSource::new(vec![
        raw_row("1.1.1.1", "电信", "0.00%", "20ms", "50mb/s"),
        raw_row("1.1.1.2", "电信", "0.00%", "20ms", "80mb/s"),
        raw_row("1.1.1.3", "电信", "0.00%", "15ms", "10mb/s"),
        raw_row("[2606:4700::1]", "电信", "0%", "30ms", "10mb/s"),
        raw_row("2.2.2.2", "联通", "0%", "25ms", "10mb/s"),
        raw_row("3.3.3.3", "移动", "5.00%", "10ms", "90mb/s"),
        raw_row("not-an-ip", "移动", "0%", "10ms", "90mb/s"),
        raw_row("4.4.4.4", "多线", "0%", "1ms", "99mb/s"),
    ])
}

#[tokio::test]
async fn mobile_without_eligible_rows_is_skipped() {
    let writer = RecordingWriter::new();
    let config = minimal_config(full_dns(2));

    let (pipeline, _events) =
        Pipeline::new(Box::new(sample_feed()), Box::new(writer.clone()), &config).unwrap();
    let report = pipeline.run_once().await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.rows_total, 8);
    assert_eq!(report.rows_skipped, 1);

    assert!(writer.calls().iter().all(|c| !c.record_id.starts_with("cm-")));
    assert_eq!(
        report.outcome(CarrierKey::Mobile, AddressFamily::V4),
        Some(&PairStatus::Skipped {
            reason: SkipReason::NoCandidates
        })
    );
    assert!(matches!(
        report.outcome(CarrierKey::Telecom, AddressFamily::V4),
        Some(PairStatus::Applied { .. })
    ));
    assert!(matches!(
        report.outcome(CarrierKey::Unicom, AddressFamily::V4),
        Some(PairStatus::Applied { .. })
    ));
}

#[tokio::test]
async fn writes_carry_rank_order_and_record_metadata() {
    let writer = RecordingWriter::new();
    let config = minimal_config(full_dns(2));

    let (pipeline, _events) =
        Pipeline::new(Box::new(sample_feed()), Box::new(writer.clone()), &config).unwrap();
    pipeline.run_once().await.unwrap();

    let calls = writer.calls();
    let ct_a = calls.iter().find(|c| c.record_id == "ct-a").unwrap();
    assert_eq!(ct_a.values, ["1.1.1.3", "1.1.1.2"]);
    assert_eq!(ct_a.record_type, RecordType::A);
    assert_eq!(ct_a.name, "cdn.example.com.");
    assert_eq!(ct_a.ttl, 60);

    let ct_aaaa = calls.iter().find(|c| c.record_id == "ct-aaaa").unwrap();
    assert_eq!(ct_aaaa.values, ["2606:4700::1"]);
    assert_eq!(ct_aaaa.record_type, RecordType::Aaaa);

    assert_eq!(calls.len(), 3, "ct-a, ct-aaaa and cu-a only");
}

#[tokio::test]
async fn unconfigured_pair_is_reported_as_config_missing() {
    let writer = RecordingWriter::new();
    let mut dns = full_dns(2);
    dns.lines.retain(|line| line.carrier != CarrierKey::Unicom);
    let config = minimal_config(dns);

    let (pipeline, _events) =
        Pipeline::new(Box::new(sample_feed()), Box::new(writer.clone()), &config).unwrap();
    let report = pipeline.run_once().await.unwrap();

    assert_eq!(
        report.outcome(CarrierKey::Unicom, AddressFamily::V4),
        Some(&PairStatus::Skipped {
            reason: SkipReason::ConfigMissing
        })
    );
    assert!(writer.calls().iter().all(|c| !c.record_id.starts_with("cu-")));
    assert!(report.is_success());
}

#[tokio::test]
async fn fetch_failure_is_fatal() {
    let writer = RecordingWriter::new();
    let config = minimal_config(full_dns(2));

    let (pipeline, _events) =
        Pipeline::new(Box::new(FailingFeedSource), Box::new(writer.clone()), &config).unwrap();
    let err = pipeline.run_once().await.unwrap_err();

    assert!(matches!(err, Error::Fetch(_)));
    assert!(err.is_fatal());
    assert_eq!(writer.call_count(), 0);
}

#[tokio::test]
async fn empty_feed_is_no_data() {
    let writer = RecordingWriter::new();
    let config = minimal_config(full_dns(2));

    let (pipeline, _events) = Pipeline::new(
        Box::new(StaticFeedSource::new(Vec::new())),
        Box::new(writer.clone()),
        &config,
    )
    .unwrap();
    let err = pipeline.run_once().await.unwrap_err();

    assert!(matches!(err, Error::NoData(_)));
    assert_eq!(writer.call_count(), 0);
}

#[tokio::test]
async fn all_rows_malformed_still_completes() {
    let writer = RecordingWriter::new();
    let config = minimal_config(full_dns(2));
    let feed = StaticFeedSource::new(vec![RawRow::new().with("线路", "电信")]);

    let (pipeline, _events) =
        Pipeline::new(Box::new(feed), Box::new(writer.clone()), &config).unwrap();
    let report = pipeline.run_once().await.unwrap();

    assert_eq!(report.rows_skipped, 1);
    assert_eq!(report.applied_count(), 0);
    assert_eq!(report.skipped_count(), 6);
    assert_eq!(writer.call_count(), 0);
}

#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let mut dns = full_dns(2);
    dns.record_name = String::new();
    let config = minimal_config(dns);

    let result = Pipeline::new(
        Box::new(sample_feed()),
        Box::new(RecordingWriter::new()),
        &config,
    );

    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn events_describe_the_run() {
    let config = minimal_config(full_dns(2));
    let (pipeline, mut events) = Pipeline::new(
        Box::new(sample_feed()),
        Box::new(RecordingWriter::new()),
        &config,
    )
    .unwrap();

    pipeline.run_once().await.unwrap();
    drop(pipeline);

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }

    assert_eq!(received.first(), Some(&EngineEvent::RunStarted { rows: 8 }));
    assert!(matches!(
        received.last(),
        Some(EngineEvent::RunFinished {
            applied: 3,
            failed: 0,
            ..
        })
    ));
    assert_eq!(
        received
            .iter()
            .filter(|e| matches!(e, EngineEvent::RowSkipped { index: 6, .. }))
            .count(),
        1
    );
    assert_eq!(
        received
            .iter()
            .filter(|e| matches!(e, EngineEvent::ActionApplied { .. }))
            .count(),
        3
    );
}

#[tokio::test]
async fn report_sink_receives_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("bestip");
    let config = minimal_config(full_dns(2));

    let (pipeline, _events) = Pipeline::new(
        Box::new(sample_feed()),
        Box::new(RecordingWriter::new()),
        &config,
    )
    .unwrap();
    let pipeline = pipeline.with_report_sink(Box::new(FileReportSink::new(&base, true)));
    pipeline.run_once().await.unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("bestip.json")).unwrap())
            .unwrap();
    assert_eq!(json["bestByCarrier"]["ct"]["ipv4"][0], "1.1.1.3");
    assert_eq!(json["fullByCarrier"]["cm"].as_array().unwrap().len(), 1);
    assert_eq!(json["fullByCarrier"]["unknown"].as_array().unwrap().len(), 1);

    let text = std::fs::read_to_string(dir.path().join("bestip.txt")).unwrap();
    assert!(text.contains("[2606:4700::1]#电信"));
}
