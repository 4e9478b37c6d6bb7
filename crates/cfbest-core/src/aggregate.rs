//! Carrier aggregation
//!
//! Groups normalized rows by [`CarrierKey`]. Rows keep their first-seen order
//! inside a bucket and buckets are never mutated once built.

use std::collections::BTreeMap;

use crate::measurement::{CarrierKey, MeasurementRow};

/// Rows sharing one carrier, in feed order
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierBucket {
    carrier: CarrierKey,
    rows: Vec<MeasurementRow>,
}

impl CarrierBucket {
    /// Build a bucket; rows whose carrier differs from `carrier` are dropped
    pub fn new(carrier: CarrierKey, rows: impl IntoIterator<Item = MeasurementRow>) -> Self {
        Self {
            carrier,
            rows: rows.into_iter().filter(|r| r.carrier == carrier).collect(),
        }
    }

    pub fn carrier(&self) -> CarrierKey {
        self.carrier
    }

    pub fn rows(&self) -> &[MeasurementRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Group rows by carrier
///
/// Unknown-carrier rows get their own bucket so they stay in the full dataset;
/// selection ignores that bucket.
pub fn aggregate<I>(rows: I) -> BTreeMap<CarrierKey, CarrierBucket>
where
    I: IntoIterator<Item = MeasurementRow>,
{
    let mut grouped: BTreeMap<CarrierKey, Vec<MeasurementRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.carrier).or_default().push(row);
    }

    grouped
        .into_iter()
        .map(|(carrier, rows)| (carrier, CarrierBucket { carrier, rows }))
        .collect()
}
