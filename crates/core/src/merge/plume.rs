//! Spatial-bucket merge for dispersion-grid aggregation.
//!
//! Fires are bucketed into grid cells derived from a configured boundary
//! and spacing; each multi-fire cell is collapsed into one synthetic fire
//! at the members' area-weighted centroid. Plume heights are pooled
//! across members weighted by their PM2.5 time-profiled emissions, then
//! redistributed over a fixed number of height levels such that total
//! weighted mass is conserved.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::GridConfig;
use crate::error::{Result, SmokeError};
use crate::fires::record::{FireRecord, Location, PlumeriseHour};
use crate::merge::{sum_hourly, sum_hourly_keyed};

pub struct PlumeMerger {
    spacing: f64,
    sw_lat: f64,
    sw_lng: f64,
    ne_lat: f64,
    ne_lng: f64,
}

impl PlumeMerger {
    /// Builds a merger from grid configuration. All five values (spacing
    /// plus both boundary corners) are required and must be consistent.
    pub fn new(config: &GridConfig) -> Result<Self> {
        let invalid =
            || SmokeError::Config("missing or invalid plume_merge configuration".to_string());
        let spacing = config.spacing.ok_or_else(invalid)?;
        let boundary = config.boundary.ok_or_else(invalid)?;
        if spacing <= 0.0
            || boundary.sw.lat >= boundary.ne.lat
            || boundary.sw.lng >= boundary.ne.lng
        {
            return Err(invalid());
        }
        Ok(PlumeMerger {
            spacing,
            sw_lat: boundary.sw.lat,
            sw_lng: boundary.sw.lng,
            ne_lat: boundary.ne.lat,
            ne_lng: boundary.ne.lng,
        })
    }

    /// Buckets fires into grid cells and merges each non-singleton
    /// bucket. Fires outside the boundary are silently dropped from the
    /// merged output (by design, not an error).
    pub fn merge(&self, fires: Vec<FireRecord>) -> Result<Vec<FireRecord>> {
        let buckets = self.bucket_fires(fires)?;
        let mut merged = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            merged.push(Self::merge_bucket(bucket)?);
        }
        Ok(merged)
    }

    /// Integer cell index per fire; buckets come back in first-occurrence
    /// order so downstream tranching stays deterministic.
    fn bucket_fires(&self, fires: Vec<FireRecord>) -> Result<Vec<Vec<FireRecord>>> {
        let mut order: Vec<(i64, i64)> = Vec::new();
        let mut buckets: FxHashMap<(i64, i64), Vec<FireRecord>> = FxHashMap::default();
        for fire in fires {
            let lat = fire.latitude()?;
            let lng = fire.longitude()?;
            if lat < self.sw_lat || lat > self.ne_lat || lng < self.sw_lng || lng > self.ne_lng {
                debug!(fire = %fire.id, "fire outside plume merge boundary; excluded");
                continue;
            }
            let key = (
                ((lat - self.sw_lat) / self.spacing).floor() as i64,
                ((lng - self.sw_lng) / self.spacing).floor() as i64,
            );
            buckets
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(fire);
        }
        Ok(order
            .into_iter()
            .filter_map(|k| buckets.remove(&k))
            .collect())
    }

    fn merge_bucket(mut fires: Vec<FireRecord>) -> Result<FireRecord> {
        if fires.len() == 1 {
            return Ok(fires.remove(0));
        }

        let (lat, lng) = Self::area_weighted_centroid(&fires)?;
        let mut total_area = 0.0;
        let mut source_ids = BTreeSet::new();
        let mut timeprofiled_area = std::collections::BTreeMap::new();
        let mut timeprofiled_emissions = std::collections::BTreeMap::new();
        let mut consumption = crate::datautils::NestedMap::new();
        let mut emissions = crate::datautils::NestedMap::new();
        let mut heat = crate::datautils::NestedMap::new();
        let mut meta = std::collections::BTreeMap::new();

        for f in &fires {
            total_area += f.area()?;
            source_ids.extend(f.source_ids());
            timeprofiled_area = sum_hourly(&timeprofiled_area, &f.timeprofiled_area);
            timeprofiled_emissions =
                sum_hourly_keyed(&timeprofiled_emissions, &f.timeprofiled_emissions);
            consumption = consumption.sum(&f.consumption)?;
            emissions = emissions.sum(&f.emissions)?;
            heat = heat.sum(&f.heat)?;
            for (k, v) in &f.meta {
                if meta.get(k).is_some_and(|existing| existing != v) {
                    warn!(key = k, "conflicting meta values in plume merge; keeping last");
                }
                meta.insert(k.clone(), v.clone());
            }
        }

        let mut merged = FireRecord::new();
        merged.original_source_ids = source_ids;
        merged.fire_type = fires[0].fire_type;
        merged.fuel_type = fires[0].fuel_type;
        merged.meta = meta;
        merged.start = fires.iter().filter_map(|f| f.start).min();
        merged.end = fires.iter().filter_map(|f| f.end).max();
        merged.location = Some(Location::Point {
            latitude: lat,
            longitude: lng,
            area: total_area,
        });
        // offsets could differ across the cell; take the first member's
        merged.utc_offset = fires[0].utc_offset;
        merged.plumerise = Self::merge_plumerise(&fires)?;
        merged.timeprofiled_area = timeprofiled_area;
        merged.timeprofiled_emissions = timeprofiled_emissions;
        merged.consumption = consumption;
        merged.emissions = emissions;
        merged.heat = heat;
        Ok(merged)
    }

    fn area_weighted_centroid(fires: &[FireRecord]) -> Result<(f64, f64)> {
        let mut total_area = 0.0;
        let mut lat_sum = 0.0;
        let mut lng_sum = 0.0;
        for f in fires {
            let area = f.area()?;
            total_area += area;
            lat_sum += f.latitude()? * area;
            lng_sum += f.longitude()? * area;
        }
        if total_area <= 0.0 {
            return Err(SmokeError::Merge(
                "cannot compute centroid of zero-area fires".to_string(),
            ));
        }
        Ok((lat_sum / total_area, lng_sum / total_area))
    }

    /// Pools all members' plume height bins per hour, weighted by each
    /// member's PM2.5 emission at that hour, and redistributes the pooled
    /// mass over a fixed number of evenly spaced levels spanning the
    /// observed height range.
    ///
    /// Conservation: the sum over levels of `fraction * total_pm25`
    /// equals the sum over members of `fraction * member_pm25`.
    fn merge_plumerise(
        fires: &[FireRecord],
    ) -> Result<std::collections::BTreeMap<NaiveDateTime, PlumeriseHour>> {
        let num_levels = Self::common_level_count(fires)?;
        let Some(num_levels) = num_levels else {
            return Ok(std::collections::BTreeMap::new());
        };

        let hours: BTreeSet<NaiveDateTime> = fires
            .iter()
            .flat_map(|f| f.plumerise.keys().copied())
            .collect();

        let mut merged = std::collections::BTreeMap::new();
        for dt in hours {
            // (bin midpoint, pm2.5-weighted fraction) pooled across members
            let mut levels: Vec<(f64, f64)> = Vec::new();
            let mut edge_min = f64::INFINITY;
            let mut edge_max = f64::NEG_INFINITY;
            let mut total_pm25 = 0.0;
            let mut smolder_weighted = 0.0;

            for f in fires {
                let (Some(hour), Some(species)) =
                    (f.plumerise.get(&dt), f.timeprofiled_emissions.get(&dt))
                else {
                    continue;
                };
                let pm25 = species.get("PM2.5").copied().unwrap_or(0.0);
                total_pm25 += pm25;
                smolder_weighted += hour.smolder_fraction * pm25;
                if let (Some(first), Some(last)) = (hour.heights.first(), hour.heights.last()) {
                    edge_min = edge_min.min(*first);
                    edge_max = edge_max.max(*last);
                }
                for (i, fraction) in hour.emission_fractions.iter().enumerate() {
                    let midpoint = (hour.heights[i] + hour.heights[i + 1]) / 2.0;
                    levels.push((midpoint, fraction * pm25));
                }
            }

            if levels.is_empty() || !edge_min.is_finite() {
                continue;
            }

            let span = edge_max - edge_min;
            let mut fractions = vec![0.0; num_levels];
            for (height, weight) in levels {
                let idx = if span > 0.0 {
                    (((height - edge_min) / span) * num_levels as f64) as usize
                } else {
                    0
                };
                fractions[idx.min(num_levels - 1)] += weight;
            }
            // normalize back to fractions of the pooled pm2.5 mass
            if total_pm25 > 0.0 {
                for v in &mut fractions {
                    *v /= total_pm25;
                }
            }

            let step = if num_levels > 0 { span / num_levels as f64 } else { 0.0 };
            let heights = (0..=num_levels)
                .map(|i| edge_min + step * i as f64)
                .collect();
            merged.insert(
                dt,
                PlumeriseHour {
                    heights,
                    emission_fractions: fractions,
                    smolder_fraction: if total_pm25 > 0.0 {
                        smolder_weighted / total_pm25
                    } else {
                        0.0
                    },
                },
            );
        }
        Ok(merged)
    }

    /// All members must agree on the number of plume levels; returns None
    /// when no member carries plumerise data at all.
    fn common_level_count(fires: &[FireRecord]) -> Result<Option<usize>> {
        let mut count = None;
        for f in fires {
            for hour in f.plumerise.values() {
                let n = hour.emission_fractions.len();
                if hour.heights.len() != n + 1 {
                    return Err(SmokeError::Merge(format!(
                        "fire {} has {} heights for {} emission fractions",
                        f.id,
                        hour.heights.len(),
                        n
                    )));
                }
                match count {
                    None => count = Some(n),
                    Some(existing) if existing != n => {
                        return Err(SmokeError::Merge(
                            "fires have differing numbers of plume heights".to_string(),
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(count)
    }
}
