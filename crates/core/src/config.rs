//! Per-run configuration.
//!
//! One `RunConfig` is constructed per run and passed by reference into the
//! components that need it. There is no process-wide configuration state;
//! wildcard substitution is done with pure functions taking explicit
//! today/run-id arguments.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level configuration for a single pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Move fires that fail a module to the failed list instead of
    /// failing the whole run.
    pub skip_failed_fires: bool,
    pub merge: StageConfig,
    pub filter: FilterConfig,
    pub dispersion: DispersionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub skip_failures: bool,
}

/// Criteria for removing fires into the filtered list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub skip_failures: bool,
    /// Per-meta-field allow/deny lists, keyed by field name.
    pub fields: BTreeMap<String, FieldFilter>,
    /// Drop fires whose coordinates fall outside this boundary.
    pub location: Option<BoundaryConfig>,
    pub area: Option<AreaFilter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldFilter {
    pub whitelist: Option<Vec<Value>>,
    pub blacklist: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaFilter {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Southwest / northeast corners of a lat/lng box, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    pub sw: LatLng,
    pub ne: LatLng,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl BoundaryConfig {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.sw.lat && lat <= self.ne.lat && lng >= self.sw.lng && lng <= self.ne.lng
    }
}

/// Spacing unit interpretation for grid settings. `LatLon` means spacing
/// values are already in degrees; anything else is in kilometers and gets
/// converted at the grid center latitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    LatLon,
    Lcc,
}

impl Projection {
    pub fn spacing_in_degrees(self) -> bool {
        self == Projection::LatLon
    }
}

/// Boundary + spacing description of a sampling grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub boundary: Option<BoundaryConfig>,
    pub spacing: Option<f64>,
    pub projection: Option<Projection>,
}

/// Explicit user-defined grid, overriding any derivation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserDefinedGrid {
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub height_latitude: f64,
    pub width_longitude: f64,
    pub spacing_latitude: f64,
    pub spacing_longitude: f64,
}

/// Settings consumed by the tranching and grid engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionConfig {
    /// Explicitly requested process count; 0 means unset.
    pub num_processes: usize,
    pub num_fires_per_process: usize,
    pub num_processes_max: usize,
    /// Whether the run reads or writes a shared particle-initialization
    /// file, which forbids reducing concurrency below what was asked for.
    pub parinit_or_pardump: bool,

    pub model_start: Option<NaiveDateTime>,
    pub num_hours: usize,

    pub projection: Projection,
    pub user_defined_grid: Option<UserDefinedGrid>,
    pub grid: Option<GridConfig>,
    pub compute_grid: bool,
    pub grid_length: Option<f64>,
    pub spacing_latitude: Option<f64>,
    pub spacing_longitude: Option<f64>,

    pub plume_merge: Option<GridConfig>,
}

/// Replaces `{timestamp}`, `{today}` and `{run_id}` placeholders.
///
/// `now` is passed in rather than read from the clock so that substitution
/// is a pure function of its arguments.
pub fn fill_in_wildcards(
    value: &str,
    now: NaiveDateTime,
    today: NaiveDate,
    run_id: Option<&str>,
) -> String {
    let mut out = value.replace("{timestamp}", &now.format("%Y%m%d%H%M%S").to_string());
    out = out.replace("{today}", &today.format("%Y%m%d").to_string());
    if let Some(run_id) = run_id {
        out = out.replace("{run_id}", run_id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn wildcard_substitution() {
        let now = dt("2019-08-29T12:30:00");
        let out = fill_in_wildcards(
            "run-{timestamp}-{today}-{run_id}",
            now,
            now.date(),
            Some("abc"),
        );
        assert_eq!(out, "run-20190829123000-20190829-abc");
    }

    #[test]
    fn wildcard_substitution_is_pure() {
        let now = dt("2019-08-29T12:30:00");
        let a = fill_in_wildcards("{timestamp}", now, now.date(), None);
        let b = fill_in_wildcards("{timestamp}", now, now.date(), None);
        assert_eq!(a, b);
    }

    #[test]
    fn boundary_contains() {
        let b = BoundaryConfig {
            sw: LatLng { lat: 40.0, lng: -120.0 },
            ne: LatLng { lat: 50.0, lng: -110.0 },
        };
        assert!(b.contains(45.0, -118.0));
        assert!(!b.contains(39.0, -118.0));
        assert!(!b.contains(45.0, -109.0));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"skip_failed_fires": true, "dispersion": {"num_processes": 2}}"#,
        )
        .unwrap();
        assert!(cfg.skip_failed_fires);
        assert_eq!(cfg.dispersion.num_processes, 2);
        assert_eq!(cfg.dispersion.num_fires_per_process, 0);
        assert!(!cfg.merge.skip_failures);
    }
}
