//! Contract Test: Partial Failure
//!
//! Constraints verified:
//! - One failed write never stops the remaining actions
//! - Every action gets exactly one outcome, in plan order
//! - No automatic retry happens inside a run
//! - A failed pair is reported as failed while other pairs succeed

mod common;

use std::sync::Arc;

use cfbest_core::config::ApplyMode;
use cfbest_core::engine::apply;
use cfbest_core::measurement::{AddressFamily, CarrierKey};
use cfbest_core::planner::{ReconciliationAction, RecordType};
use cfbest_core::{Error, PairStatus, Pipeline};
use common::*;

fn action(carrier: CarrierKey, record_id: &str, ip: &str) -> ReconciliationAction {
    ReconciliationAction {
        carrier,
        address_family: AddressFamily::V4,
        record_id: record_id.to_string(),
        record_name: "cdn.example.com.".to_string(),
        record_type: RecordType::A,
        desired_addresses: vec![ip.parse().unwrap()],
        ttl: 60,
    }
}

fn three_actions() -> Vec<ReconciliationAction> {
    vec![
        action(CarrierKey::Telecom, "ct-a", "1.1.1.1"),
        action(CarrierKey::Unicom, "cu-a", "2.2.2.2"),
        action(CarrierKey::Mobile, "cm-a", "3.3.3.3"),
    ]
}

#[tokio::test]
async fn second_failure_does_not_block_third_sequential() {
    let writer = RecordingWriter::new().fail_call(1);

    let outcomes = apply(three_actions(), Arc::new(writer.clone()), ApplyMode::Sequential).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_success());
    assert!(matches!(outcomes[1].result, Err(Error::Remote { .. })));
    assert!(outcomes[2].is_success());
    assert_eq!(writer.call_count(), 3, "no retries, no early exit");
}

#[tokio::test]
async fn second_failure_does_not_block_third_concurrent() {
    let writer = RecordingWriter::new().fail_record("cu-a");

    let outcomes = apply(three_actions(), Arc::new(writer.clone()), ApplyMode::Concurrent).await;

    let ids: Vec<&str> = outcomes.iter().map(|o| o.action.record_id.as_str()).collect();
    assert_eq!(ids, ["ct-a", "cu-a", "cm-a"], "outcomes come back in plan order");
    assert!(outcomes[0].is_success());
    assert!(!outcomes[1].is_success());
    assert!(outcomes[2].is_success());
    assert_eq!(writer.call_count(), 3);
}

#[tokio::test]
async fn empty_plan_makes_no_calls() {
    let writer = RecordingWriter::new();
    let outcomes = apply(Vec::new(), Arc::new(writer.clone()), ApplyMode::Concurrent).await;
    assert!(outcomes.is_empty());
    assert_eq!(writer.call_count(), 0);
}

#[tokio::test]
async fn pipeline_reports_failed_pair_and_keeps_others() {
    let feed = StaticFeedSource::new(vec![
        raw_row("1.1.1.1", "电信", "0%", "10ms", "50mb/s"),
        raw_row("2.2.2.2", "联通", "0%", "10ms", "50mb/s"),
        raw_row("3.3.3.3", "移动", "0%", "10ms", "50mb/s"),
    ]);
    let writer = RecordingWriter::new().fail_record("cu-a");
    let config = minimal_config(full_dns(2));

    let (pipeline, _events) =
        Pipeline::new(Box::new(feed), Box::new(writer.clone()), &config).unwrap();
    let report = pipeline.run_once().await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed_count(), 1);
    assert!(matches!(
        report.outcome(CarrierKey::Unicom, AddressFamily::V4),
        Some(PairStatus::Failed { .. })
    ));
    assert!(matches!(
        report.outcome(CarrierKey::Telecom, AddressFamily::V4),
        Some(PairStatus::Applied { .. })
    ));
    assert!(matches!(
        report.outcome(CarrierKey::Mobile, AddressFamily::V4),
        Some(PairStatus::Applied { .. })
    ));
}
