//! Identity/time merge of dispersion-ready fire records.
//!
//! The same physical fire typically shows up once per reporting day.
//! Records at exactly the same coordinates whose time windows do not
//! overlap and whose metadata does not conflict are combined into one
//! record covering the union of their windows.

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Result, SmokeError};
use crate::fires::record::{FireRecord, Location};
use crate::merge::merge_hourly;

/// Stateless engine; all knobs live in the records themselves.
pub struct FireMerger;

/// Exact-coordinate bucket key. Bit-level equality is intentional: records
/// from the same source report identical floats, and anything else is not
/// "the same location".
type LatLngKey = (u64, u64);

impl FireMerger {
    /// Merges co-located, time-disjoint fires.
    ///
    /// Candidates are visited in start-time order. Within a coordinate
    /// bucket each fire is merged into the first already-collected entry
    /// it is compatible with; checking only the first eligible entry is a
    /// deliberate simplification kept for output determinism.
    pub fn merge(fires: Vec<FireRecord>) -> Result<Vec<FireRecord>> {
        let mut sorted = fires;
        for f in &sorted {
            if f.start.is_none() || f.end.is_none() {
                return Err(SmokeError::Validation(format!(
                    "fire {} has no start/end; cannot merge",
                    f.id
                )));
            }
        }
        sorted.sort_by_key(|f| f.start);

        // buckets in insertion order so output is deterministic
        let mut bucket_order: Vec<LatLngKey> = Vec::new();
        let mut buckets: FxHashMap<LatLngKey, Vec<FireRecord>> = FxHashMap::default();

        for fire in sorted {
            let key = (
                fire.latitude()?.to_bits(),
                fire.longitude()?.to_bits(),
            );
            let bucket = buckets.entry(key).or_insert_with(|| {
                bucket_order.push(key);
                Vec::new()
            });

            // entries stay start-sorted: merging keeps the earlier start
            let eligible = bucket.iter().position(|collected| {
                !Self::windows_overlap(collected, &fire)
                    && !Self::metas_conflict(collected, &fire)
            });
            match eligible {
                Some(i) => {
                    debug!(
                        fire = %fire.id,
                        into = %bucket[i].id,
                        "merging co-located fire"
                    );
                    bucket[i] = Self::merge_two(&bucket[i], &fire)?;
                }
                None => bucket.push(fire),
            }
        }

        Ok(bucket_order
            .into_iter()
            .filter_map(|k| buckets.remove(&k))
            .flatten()
            .collect())
    }

    fn windows_overlap(f1: &FireRecord, f2: &FireRecord) -> bool {
        // start/end presence was checked up front
        f1.start < f2.end && f2.start < f1.end
    }

    fn metas_conflict(f1: &FireRecord, f2: &FireRecord) -> bool {
        f1.meta
            .iter()
            .any(|(k, v)| f2.meta.get(k).is_some_and(|other| other != v))
    }

    /// Combines a later-starting fire into an earlier one. The result gets
    /// a fresh id; traceability is maintained through
    /// `original_source_ids`.
    fn merge_two(earlier: &FireRecord, later: &FireRecord) -> Result<FireRecord> {
        // there may be a gap between earlier.end and later.start, but no
        // subsequent fire can fall in it since candidates are start-sorted
        let later_start: NaiveDateTime = later
            .start
            .ok_or_else(|| SmokeError::Merge("fire without start".to_string()))?;

        let mut merged = FireRecord::new();
        merged.original_source_ids = earlier
            .source_ids()
            .union(&later.source_ids())
            .cloned()
            .collect();
        merged.fire_type = earlier.fire_type;
        merged.fuel_type = earlier.fuel_type;
        // metas were checked for conflicts; overlapping keys agree
        merged.meta = earlier.meta.clone();
        merged.meta.extend(later.meta.clone());
        merged.start = earlier.start;
        merged.end = later.end;
        merged.location = Some(Location::Point {
            latitude: earlier.latitude()?,
            longitude: earlier.longitude()?,
            area: earlier.area()? + later.area()?,
        });
        // offsets could differ across a DST transition; take the earlier
        merged.utc_offset = earlier.utc_offset;
        merged.plumerise = merge_hourly(&earlier.plumerise, &later.plumerise, later_start);
        merged.timeprofiled_area = merge_hourly(
            &earlier.timeprofiled_area,
            &later.timeprofiled_area,
            later_start,
        );
        merged.timeprofiled_emissions = merge_hourly(
            &earlier.timeprofiled_emissions,
            &later.timeprofiled_emissions,
            later_start,
        );
        merged.consumption = earlier.consumption.sum(&later.consumption)?;
        merged.emissions = earlier.emissions.sum(&later.emissions)?;
        merged.heat = earlier.heat.sum(&later.heat)?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn fire(id: &str, lat: f64, lng: f64, area: f64, start: &str, end: &str) -> FireRecord {
        let mut f = FireRecord::with_id(id);
        f.location = Some(Location::Point {
            latitude: lat,
            longitude: lng,
            area,
        });
        f.start = Some(dt(start));
        f.end = Some(dt(end));
        f
    }

    #[test]
    fn disjoint_same_location_fires_merge() {
        let a = fire("a", 45.0, -118.0, 100.0, "2019-08-01T00:00:00", "2019-08-02T00:00:00");
        let b = fire("b", 45.0, -118.0, 50.0, "2019-08-02T00:00:00", "2019-08-03T00:00:00");
        let merged = FireMerger::merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.area().unwrap(), 150.0);
        assert_eq!(m.start, Some(dt("2019-08-01T00:00:00")));
        assert_eq!(m.end, Some(dt("2019-08-03T00:00:00")));
        assert_eq!(
            m.original_source_ids,
            ["a", "b"].iter().map(ToString::to_string).collect()
        );
        // merged record gets a fresh id
        assert_ne!(m.id, "a");
        assert_ne!(m.id, "b");
    }

    #[test]
    fn overlapping_fires_do_not_merge() {
        let a = fire("a", 45.0, -118.0, 100.0, "2019-08-01T00:00:00", "2019-08-02T12:00:00");
        let b = fire("b", 45.0, -118.0, 50.0, "2019-08-02T00:00:00", "2019-08-03T00:00:00");
        let merged = FireMerger::merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn different_locations_do_not_merge() {
        let a = fire("a", 45.0, -118.0, 100.0, "2019-08-01T00:00:00", "2019-08-02T00:00:00");
        let b = fire("b", 45.1, -118.0, 50.0, "2019-08-02T00:00:00", "2019-08-03T00:00:00");
        let merged = FireMerger::merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn conflicting_meta_blocks_merge() {
        let mut a = fire("a", 45.0, -118.0, 100.0, "2019-08-01T00:00:00", "2019-08-02T00:00:00");
        let mut b = fire("b", 45.0, -118.0, 50.0, "2019-08-02T00:00:00", "2019-08-03T00:00:00");
        a.meta.insert("source".to_string(), json!("GOES"));
        b.meta.insert("source".to_string(), json!("MODIS"));
        let merged = FireMerger::merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn compatible_meta_is_unioned() {
        let mut a = fire("a", 45.0, -118.0, 100.0, "2019-08-01T00:00:00", "2019-08-02T00:00:00");
        let mut b = fire("b", 45.0, -118.0, 50.0, "2019-08-02T00:00:00", "2019-08-03T00:00:00");
        a.meta.insert("source".to_string(), json!("GOES"));
        b.meta.insert("flagged".to_string(), json!(true));
        let merged = FireMerger::merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].meta.get("source"), Some(&json!("GOES")));
        assert_eq!(merged[0].meta.get("flagged"), Some(&json!(true)));
    }

    #[test]
    fn hourly_series_overlay_drops_pre_start_overlap() {
        let mut a = fire("a", 45.0, -118.0, 100.0, "2019-08-01T00:00:00", "2019-08-02T00:00:00");
        let mut b = fire("b", 45.0, -118.0, 50.0, "2019-08-02T00:00:00", "2019-08-03T00:00:00");
        a.timeprofiled_area.insert(dt("2019-08-01T00:00:00"), 10.0);
        a.timeprofiled_area.insert(dt("2019-08-02T00:00:00"), 99.0);
        // the later fire also reports the boundary hour plus an earlier
        // stray hour that must not clobber the earlier fire's data
        b.timeprofiled_area.insert(dt("2019-08-01T12:00:00"), 7.0);
        b.timeprofiled_area.insert(dt("2019-08-02T00:00:00"), 5.0);
        let merged = FireMerger::merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 1);
        let ts = &merged[0].timeprofiled_area;
        assert_eq!(ts.get(&dt("2019-08-01T00:00:00")), Some(&10.0));
        assert_eq!(ts.get(&dt("2019-08-01T12:00:00")), None);
        assert_eq!(ts.get(&dt("2019-08-02T00:00:00")), Some(&5.0));
    }

    #[test]
    fn consumption_sums_recursively() {
        let mut a = fire("a", 45.0, -118.0, 100.0, "2019-08-01T00:00:00", "2019-08-02T00:00:00");
        let mut b = fire("b", 45.0, -118.0, 50.0, "2019-08-02T00:00:00", "2019-08-03T00:00:00");
        a.consumption.set_leaf(&["canopy", "flaming"], 1.5);
        b.consumption.set_leaf(&["canopy", "flaming"], 2.5);
        b.consumption.set_leaf(&["shrub", "smoldering"], 1.0);
        let merged = FireMerger::merge(vec![a, b]).unwrap();
        let c = &merged[0].consumption;
        assert_eq!(c.get_leaf(&["canopy", "flaming"]), Some(4.0));
        assert_eq!(c.get_leaf(&["shrub", "smoldering"]), Some(1.0));
    }

    #[test]
    fn only_first_eligible_entry_is_merged_into() {
        // two disjoint early fires at the same spot that conflict with
        // each other, plus a third compatible with both: it must merge
        // into the first (earliest-start) entry only
        let mut a = fire("a", 45.0, -118.0, 10.0, "2019-08-01T00:00:00", "2019-08-01T06:00:00");
        let mut b = fire("b", 45.0, -118.0, 20.0, "2019-08-01T00:00:00", "2019-08-01T06:00:00");
        a.meta.insert("k".to_string(), json!(1));
        b.meta.insert("k".to_string(), json!(2));
        let c = fire("c", 45.0, -118.0, 5.0, "2019-08-02T00:00:00", "2019-08-02T06:00:00");
        let merged = FireMerger::merge(vec![a, b, c]).unwrap();
        assert_eq!(merged.len(), 2);
        let with_c: Vec<_> = merged
            .iter()
            .filter(|f| f.original_source_ids.contains("c"))
            .collect();
        assert_eq!(with_c.len(), 1);
        assert!(with_c[0].original_source_ids.contains("a"));
        assert_eq!(with_c[0].area().unwrap(), 15.0);
    }

    #[test]
    fn missing_start_is_a_validation_error() {
        let mut f = fire("a", 45.0, -118.0, 10.0, "2019-08-01T00:00:00", "2019-08-02T00:00:00");
        f.start = None;
        assert!(FireMerger::merge(vec![f]).is_err());
    }
}
