//! Fire merge engines.
//!
//! Three strategies, all additive over the nested numeric result data:
//!
//! - [`by_id`]: manager-level merge of just-ingested records sharing a
//!   public id (one record per reporting day of the same fire).
//! - [`identity`]: identity/time merge of dispersion-ready records at the
//!   exact same coordinates with non-overlapping time windows.
//! - [`plume`]: spatial-bucket merge aggregating fires into dispersion
//!   grid cells, with PM2.5-weighted plume-height pooling.

pub mod by_id;
pub mod identity;
pub mod plume;

pub use identity::FireMerger;
pub use plume::PlumeMerger;

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

/// Overlays `later` onto `earlier`, restricted to timestamps at or after
/// `later_start`. Dropping the pre-start portion of the later series
/// prevents double-counting the overlap boundary hour.
pub(crate) fn merge_hourly<T: Clone>(
    earlier: &BTreeMap<NaiveDateTime, T>,
    later: &BTreeMap<NaiveDateTime, T>,
    later_start: NaiveDateTime,
) -> BTreeMap<NaiveDateTime, T> {
    let mut out = earlier.clone();
    for (k, v) in later.range(later_start..) {
        out.insert(*k, v.clone());
    }
    out
}

/// Key-wise sum of two hourly scalar series; unmatched hours pass through.
pub(crate) fn sum_hourly(
    a: &BTreeMap<NaiveDateTime, f64>,
    b: &BTreeMap<NaiveDateTime, f64>,
) -> BTreeMap<NaiveDateTime, f64> {
    let mut out = a.clone();
    for (k, v) in b {
        *out.entry(*k).or_insert(0.0) += v;
    }
    out
}

/// Key-wise sum of two hourly keyed-scalar series (e.g. per-species
/// time-profiled emissions).
pub(crate) fn sum_hourly_keyed(
    a: &BTreeMap<NaiveDateTime, BTreeMap<String, f64>>,
    b: &BTreeMap<NaiveDateTime, BTreeMap<String, f64>>,
) -> BTreeMap<NaiveDateTime, BTreeMap<String, f64>> {
    let mut out = a.clone();
    for (k, inner) in b {
        let entry = out.entry(*k).or_default();
        for (species, v) in inner {
            *entry.entry(species.clone()).or_insert(0.0) += v;
        }
    }
    out
}
