//! Selection pipeline
//!
//! One [`Pipeline::run_once`] call runs the whole data flow:
//!
//! ```text
//! ┌────────────┐  raw rows   ┌────────────┐  rows   ┌────────────┐
//! │ FeedSource │───────────▶│ Normalizer │───────▶│ Aggregator │
//! └────────────┘             └────────────┘         └────────────┘
//!                                                          │ buckets
//!                                                          ▼
//! ┌────────────┐  actions    ┌────────────┐ selections ┌───────────┐
//! │  Executor  │◀───────────│  Planner   │◀──────────│ Selection │
//! └────────────┘             └────────────┘            └───────────┘
//!       │
//!       ├──▶ DnsRecordWriter (one call per action)
//!       ├──▶ StateStore      (applied-set cache, optional)
//!       └──▶ ReportSink      (snapshot, optional)
//! ```
//!
//! Only a feed failure or an empty feed aborts a run. Everything after that
//! is reported per (carrier, family) in the returned [`RunReport`].

pub mod apply;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::aggregate::aggregate;
use crate::config::{CfBestConfig, DnsConfig, EngineConfig};
use crate::error::{Error, ParseError, Result};
use crate::measurement::{AddressFamily, CarrierKey, Normalizer};
use crate::planner::{ReconciliationAction, SkipReason, plan};
use crate::report::RunSnapshot;
use crate::selection::select_all;
use crate::traits::{DnsRecordWriter, FeedSource, ReportSink, StateStore};

pub use apply::{ApplyOutcome, apply};

/// Events emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Feed delivered rows
    RunStarted { rows: usize },

    /// A feed row was rejected by the normalizer
    RowSkipped { index: usize, error: ParseError },

    /// A pair produced no action
    PairSkipped {
        carrier: CarrierKey,
        family: AddressFamily,
        reason: SkipReason,
    },

    /// Writer accepted an action
    ActionApplied {
        carrier: CarrierKey,
        family: AddressFamily,
        record_id: String,
        addresses: Vec<IpAddr>,
    },

    /// Action skipped because the record already holds the same values
    ActionUnchanged {
        carrier: CarrierKey,
        family: AddressFamily,
        record_id: String,
    },

    /// Writer rejected an action
    ActionFailed {
        carrier: CarrierKey,
        family: AddressFamily,
        record_id: String,
        error: String,
    },

    /// Run completed
    RunFinished {
        applied: usize,
        unchanged: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Outcome of one (carrier, family) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairStatus {
    Applied { addresses: Vec<IpAddr> },
    Unchanged,
    Skipped { reason: SkipReason },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairOutcome {
    pub carrier: CarrierKey,
    pub family: AddressFamily,
    #[serde(flatten)]
    pub status: PairStatus,
}

/// What one run did
///
/// Outcomes are ordered by carrier, then family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub rows_total: usize,
    pub rows_skipped: usize,
    pub outcomes: Vec<PairOutcome>,
}

impl RunReport {
    /// True when no pair failed
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn applied_count(&self) -> usize {
        self.count(|s| matches!(s, PairStatus::Applied { .. }))
    }

    pub fn unchanged_count(&self) -> usize {
        self.count(|s| matches!(s, PairStatus::Unchanged))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, PairStatus::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, PairStatus::Failed { .. }))
    }

    /// Outcome of one pair, if it was selected or configured
    pub fn outcome(&self, carrier: CarrierKey, family: AddressFamily) -> Option<&PairStatus> {
        self.outcomes
            .iter()
            .find(|o| o.carrier == carrier && o.family == family)
            .map(|o| &o.status)
    }

    fn count(&self, pred: impl Fn(&PairStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Runs the selection data flow against its collaborators
///
/// ## Lifecycle
///
/// 1. Create with [`Pipeline::new()`], optionally attach a state store and a
///    report sink
/// 2. Call [`Pipeline::run_once()`] once, or once per tick
/// 3. Consume [`EngineEvent`]s from the returned receiver if interested
///
/// ## Load Resistance
///
/// Events go through a bounded channel with `try_send`. A slow or absent
/// consumer makes the pipeline drop events (with a warning), never block.
pub struct Pipeline {
    feed: Box<dyn FeedSource>,
    writer: Arc<dyn DnsRecordWriter>,
    state_store: Option<Box<dyn StateStore>>,
    report_sink: Option<Box<dyn ReportSink>>,
    normalizer: Normalizer,
    dns: DnsConfig,
    engine: EngineConfig,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl Pipeline {
    /// Create a pipeline
    ///
    /// # Returns
    ///
    /// A tuple of (pipeline, event_receiver)
    pub fn new(
        feed: Box<dyn FeedSource>,
        writer: Box<dyn DnsRecordWriter>,
        config: &CfBestConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let pipeline = Self {
            feed,
            writer: Arc::from(writer),
            state_store: None,
            report_sink: None,
            normalizer: Normalizer::new(),
            dns: config.dns.clone(),
            engine: config.engine.clone(),
            event_tx: tx,
        };

        Ok((pipeline, rx))
    }

    /// Attach the applied-state cache
    ///
    /// Successful writes are always recorded. Writes are only skipped when
    /// `engine.skip_unchanged` is set.
    pub fn with_state_store(mut self, store: Box<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Attach a snapshot sink
    pub fn with_report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    /// Run the pipeline once
    ///
    /// # Returns
    ///
    /// - `Ok(report)`: the run completed, possibly with failed pairs
    /// - `Err(Error::Fetch | Error::NoData)`: nothing could be selected
    pub async fn run_once(&self) -> Result<RunReport> {
        let raw = self.feed.fetch_rows().await.map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                Error::fetch(format!("{}: {}", self.feed.source_name(), e))
            }
        })?;

        if raw.is_empty() {
            return Err(Error::no_data(format!(
                "{} returned no rows",
                self.feed.source_name()
            )));
        }

        self.emit_event(EngineEvent::RunStarted { rows: raw.len() });
        info!("Fetched {} rows from {}", raw.len(), self.feed.source_name());

        let batch = self.normalizer.normalize_batch(&raw);
        for skip in &batch.skipped {
            self.emit_event(EngineEvent::RowSkipped {
                index: skip.index,
                error: skip.error.clone(),
            });
        }
        if !batch.skipped.is_empty() {
            warn!("Skipped {} of {} feed rows", batch.skipped.len(), raw.len());
        }

        let buckets = aggregate(batch.rows.iter().cloned());
        let selections = select_all(&buckets, |carrier| self.dns.cap_for(carrier));
        let planned = plan(&selections, &self.dns);

        let mut statuses: BTreeMap<(CarrierKey, AddressFamily), PairStatus> = BTreeMap::new();

        for skip in &planned.skipped {
            match skip.to_error() {
                Some(e) => warn!("{}", e),
                None => warn!("No eligible candidates for {} {}", skip.carrier, skip.family),
            }
            self.emit_event(EngineEvent::PairSkipped {
                carrier: skip.carrier,
                family: skip.family,
                reason: skip.reason,
            });
            statuses.insert(
                (skip.carrier, skip.family),
                PairStatus::Skipped {
                    reason: skip.reason,
                },
            );
        }

        let unchanged = self.unchanged_record_ids(&planned.actions).await;
        let mut pending = Vec::with_capacity(planned.actions.len());
        for action in planned.actions {
            if unchanged.contains(&action.record_id) {
                debug!("{} {} unchanged, not writing", action.carrier, action.record_id);
                self.emit_event(EngineEvent::ActionUnchanged {
                    carrier: action.carrier,
                    family: action.address_family,
                    record_id: action.record_id.clone(),
                });
                statuses.insert((action.carrier, action.address_family), PairStatus::Unchanged);
            } else {
                pending.push(action);
            }
        }

        let outcomes = apply(pending, Arc::clone(&self.writer), self.engine.apply_mode).await;

        for outcome in outcomes {
            let action = outcome.action;
            let key = (action.carrier, action.address_family);
            match outcome.result {
                Ok(ack) => {
                    if !ack.dry_run {
                        self.remember(&action).await;
                    }
                    self.emit_event(EngineEvent::ActionApplied {
                        carrier: action.carrier,
                        family: action.address_family,
                        record_id: action.record_id.clone(),
                        addresses: action.desired_addresses.clone(),
                    });
                    statuses.insert(
                        key,
                        PairStatus::Applied {
                            addresses: action.desired_addresses,
                        },
                    );
                }
                Err(e) => {
                    self.emit_event(EngineEvent::ActionFailed {
                        carrier: action.carrier,
                        family: action.address_family,
                        record_id: action.record_id.clone(),
                        error: e.to_string(),
                    });
                    statuses.insert(key, PairStatus::Failed { error: e.to_string() });
                }
            }
        }

        if let Some(store) = &self.state_store
            && let Err(e) = store.flush().await
        {
            warn!("Failed to persist applied state: {}", e);
        }

        if let Some(sink) = &self.report_sink {
            let snapshot = RunSnapshot::build(chrono::Utc::now(), &batch.rows, &selections);
            if let Err(e) = sink.write(&snapshot).await {
                error!("Failed to write run snapshot: {}", e);
            }
        }

        let report = RunReport {
            rows_total: raw.len(),
            rows_skipped: batch.skipped.len(),
            outcomes: statuses
                .into_iter()
                .map(|((carrier, family), status)| PairOutcome {
                    carrier,
                    family,
                    status,
                })
                .collect(),
        };

        self.emit_event(EngineEvent::RunFinished {
            applied: report.applied_count(),
            unchanged: report.unchanged_count(),
            skipped: report.skipped_count(),
            failed: report.failed_count(),
        });
        info!(
            "Run finished: {} applied, {} unchanged, {} skipped, {} failed",
            report.applied_count(),
            report.unchanged_count(),
            report.skipped_count(),
            report.failed_count()
        );

        Ok(report)
    }

    /// Record ids whose final planned write equals the last applied one
    ///
    /// Lines may share a record id. The record ends up holding the last
    /// action planned for it, so only that action is compared, and either
    /// every action for the id is written or none is.
    async fn unchanged_record_ids(&self, actions: &[ReconciliationAction]) -> HashSet<String> {
        let mut unchanged = HashSet::new();
        if !self.engine.skip_unchanged {
            return unchanged;
        }
        let Some(store) = &self.state_store else {
            return unchanged;
        };

        let mut last: HashMap<&str, &ReconciliationAction> = HashMap::new();
        for action in actions {
            last.insert(action.record_id.as_str(), action);
        }

        for (record_id, action) in last {
            if Self::is_unchanged(store.as_ref(), action).await {
                unchanged.insert(record_id.to_string());
            }
        }
        unchanged
    }

    async fn is_unchanged(store: &dyn StateStore, action: &ReconciliationAction) -> bool {
        match store.get_applied(&action.record_id).await {
            Ok(Some(applied)) => applied.matches(action),
            Ok(None) => false,
            Err(e) => {
                warn!("State lookup failed for {}: {}", action.record_id, e);
                false
            }
        }
    }

    async fn remember(&self, action: &ReconciliationAction) {
        if let Some(store) = &self.state_store
            && let Err(e) = store.set_applied(action).await
        {
            warn!("Failed to record applied state for {}: {}", action.record_id, e);
        }
    }

    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(carrier: CarrierKey, family: AddressFamily, status: PairStatus) -> PairOutcome {
        PairOutcome {
            carrier,
            family,
            status,
        }
    }

    #[test]
    fn test_run_report_counts() {
        let report = RunReport {
            rows_total: 4,
            rows_skipped: 1,
            outcomes: vec![
                outcome(
                    CarrierKey::Telecom,
                    AddressFamily::V4,
                    PairStatus::Applied {
                        addresses: vec!["1.1.1.1".parse().unwrap()],
                    },
                ),
                outcome(CarrierKey::Telecom, AddressFamily::V6, PairStatus::Unchanged),
                outcome(
                    CarrierKey::Mobile,
                    AddressFamily::V4,
                    PairStatus::Failed {
                        error: "boom".to_string(),
                    },
                ),
            ],
        };

        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.unchanged_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.is_success());
        assert_eq!(
            report.outcome(CarrierKey::Telecom, AddressFamily::V6),
            Some(&PairStatus::Unchanged)
        );
        assert!(report.outcome(CarrierKey::Unicom, AddressFamily::V4).is_none());
    }

    #[test]
    fn test_pair_outcome_serializes_flat() {
        let json = serde_json::to_value(outcome(
            CarrierKey::Unicom,
            AddressFamily::V6,
            PairStatus::Skipped {
                reason: SkipReason::NoCandidates,
            },
        ))
        .unwrap();

        assert_eq!(json["carrier"], "unicom");
        assert_eq!(json["family"], "ipv6");
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "no_candidates");
    }
}
