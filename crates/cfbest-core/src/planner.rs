//! Reconciliation planner
//!
//! Turns selections into one full-overwrite write per (carrier, family) that
//! has both candidates and a destination record. No prior remote state is
//! consulted, so an unchanged selection always yields an identical plan.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::config::DnsConfig;
use crate::error::Error;
use crate::measurement::{AddressFamily, CarrierKey};
use crate::selection::SelectionResult;

/// DNS record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4
    A,
    /// IPv6
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordType {
    pub fn for_family(family: AddressFamily) -> Self {
        match family {
            AddressFamily::V4 => Self::A,
            AddressFamily::V6 => Self::Aaaa,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One desired record-set write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationAction {
    pub carrier: CarrierKey,
    pub address_family: AddressFamily,
    pub record_id: String,
    pub record_name: String,
    pub record_type: RecordType,
    /// Rank order; rank 0 is the preferred value
    pub desired_addresses: Vec<IpAddr>,
    pub ttl: u32,
}

impl ReconciliationAction {
    /// Value list as written to the record set
    pub fn values(&self) -> Vec<String> {
        self.desired_addresses.iter().map(ToString::to_string).collect()
    }

    /// Write body; identical actions produce byte-identical payloads
    pub fn payload(&self) -> serde_json::Value {
        record_payload(self.record_type, &self.record_name, self.ttl, &self.values())
    }
}

/// Record-set write body shared by the planner and the writers
///
/// Carries no timestamp or description.
pub fn record_payload(
    record_type: RecordType,
    name: &str,
    ttl: u32,
    values: &[String],
) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "type": record_type.as_str(),
        "ttl": ttl,
        "records": values,
    })
}

/// Why a pair produced no action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A record is configured but nothing was eligible
    NoCandidates,
    /// Candidates exist but no record is configured
    ConfigMissing,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCandidates => f.write_str("no eligible candidates"),
            Self::ConfigMissing => f.write_str("no destination record configured"),
        }
    }
}

/// A (carrier, family) pair left out of the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanSkip {
    pub carrier: CarrierKey,
    pub family: AddressFamily,
    pub reason: SkipReason,
}

impl PlanSkip {
    /// Error form, for logging missing configuration
    pub fn to_error(&self) -> Option<Error> {
        (self.reason == SkipReason::ConfigMissing).then_some(Error::ConfigMissing {
            carrier: self.carrier,
            family: self.family,
        })
    }
}

/// Planner output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<ReconciliationAction>,
    pub skipped: Vec<PlanSkip>,
}

/// Build the plan
///
/// Pairs are visited in a fixed (carrier, family) order so the action list is
/// stable across runs.
pub fn plan(selections: &BTreeMap<CarrierKey, SelectionResult>, dns: &DnsConfig) -> Plan {
    let mut out = Plan::default();

    for carrier in CarrierKey::SELECTABLE {
        for family in AddressFamily::ALL {
            let selected = selections
                .get(&carrier)
                .and_then(|selection| selection.get(family))
                .filter(|addrs| !addrs.is_empty());
            let record_id = dns.record_id(carrier, family);

            match (selected, record_id) {
                (Some(addrs), Some(record_id)) => out.actions.push(ReconciliationAction {
                    carrier,
                    address_family: family,
                    record_id: record_id.to_string(),
                    record_name: dns.record_name.clone(),
                    record_type: RecordType::for_family(family),
                    desired_addresses: addrs.to_vec(),
                    ttl: dns.ttl,
                }),
                (Some(_), None) => out.skipped.push(PlanSkip {
                    carrier,
                    family,
                    reason: SkipReason::ConfigMissing,
                }),
                (None, Some(_)) => out.skipped.push(PlanSkip {
                    carrier,
                    family,
                    reason: SkipReason::NoCandidates,
                }),
                (None, None) => {}
            }
        }
    }

    out
}
