//! Selection policy
//!
//! Per carrier and address family: keep rows with zero packet loss, rank them
//! by latency ascending, then throughput descending, then address text
//! ascending, drop repeated addresses and keep the first `cap`.
//!
//! The address tie-break makes the order total, so the same bucket always
//! produces the same result regardless of how the feed ordered its rows.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use crate::aggregate::CarrierBucket;
use crate::measurement::{AddressFamily, CarrierKey, MeasurementRow};

/// Ranked active set for one carrier
///
/// A family with no eligible candidate is absent, not present-and-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionResult {
    carrier: CarrierKey,
    families: BTreeMap<AddressFamily, Vec<IpAddr>>,
}

impl SelectionResult {
    pub fn empty(carrier: CarrierKey) -> Self {
        Self {
            carrier,
            families: BTreeMap::new(),
        }
    }

    pub fn carrier(&self) -> CarrierKey {
        self.carrier
    }

    /// Addresses for one family, rank 0 first
    pub fn get(&self, family: AddressFamily) -> Option<&[IpAddr]> {
        self.families.get(&family).map(Vec::as_slice)
    }

    /// Iterate the families that have at least one candidate
    pub fn families(&self) -> impl Iterator<Item = (AddressFamily, &[IpAddr])> {
        self.families.iter().map(|(f, addrs)| (*f, addrs.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

/// Total order used for ranking
pub fn rank_order(a: &MeasurementRow, b: &MeasurementRow) -> Ordering {
    a.latency_ms
        .total_cmp(&b.latency_ms)
        .then_with(|| b.throughput_mbps.total_cmp(&a.throughput_mbps))
        .then_with(|| a.address.to_string().cmp(&b.address.to_string()))
}

/// Every row of a slice in ranking order, eligible or not
pub fn rank_all(rows: &[MeasurementRow]) -> Vec<MeasurementRow> {
    let mut ranked = rows.to_vec();
    ranked.sort_by(rank_order);
    ranked
}

/// Compute the active set of one bucket
pub fn select(bucket: &CarrierBucket, cap: usize) -> SelectionResult {
    let mut result = SelectionResult::empty(bucket.carrier());
    if !bucket.carrier().is_selectable() || cap == 0 {
        return result;
    }

    for family in AddressFamily::ALL {
        let mut candidates: Vec<&MeasurementRow> = bucket
            .rows()
            .iter()
            .filter(|row| row.family() == family && row.is_eligible())
            .collect();
        candidates.sort_by(|a, b| rank_order(a, b));

        let mut seen = HashSet::new();
        let active: Vec<IpAddr> = candidates
            .into_iter()
            .map(|row| row.address)
            .filter(|addr| seen.insert(*addr))
            .take(cap)
            .collect();

        if !active.is_empty() {
            result.families.insert(family, active);
        }
    }

    result
}

/// Select every selectable carrier, dropping carriers with nothing eligible
pub fn select_all<F>(
    buckets: &BTreeMap<CarrierKey, CarrierBucket>,
    cap_for: F,
) -> BTreeMap<CarrierKey, SelectionResult>
where
    F: Fn(CarrierKey) -> usize,
{
    buckets
        .iter()
        .filter(|(carrier, _)| carrier.is_selectable())
        .map(|(carrier, bucket)| (*carrier, select(bucket, cap_for(*carrier))))
        .filter(|(_, selection)| !selection.is_empty())
        .collect()
}
