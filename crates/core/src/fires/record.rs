//! The core fire data entity.
//!
//! A `FireRecord` carries a fire's identity, location, activity windows and
//! the per-stage results accumulated as it moves through the pipeline
//! (consumption, emissions, time-profiled series, plume rise). Records are
//! plain typed structs; invalid `fire_type` / `fuel_type` strings are
//! rejected at the parse boundary rather than by dynamic interception.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::datautils::NestedMap;
use crate::error::{Result, SmokeError};

/// Tolerance when checking that activity percentages sum to 100.
pub const PCT_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FireType {
    #[default]
    Wildfire,
    Rx,
}

impl TryFrom<String> for FireType {
    type Error = SmokeError;

    fn try_from(value: String) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "wildfire" | "wf" => Ok(FireType::Wildfire),
            "rx" => Ok(FireType::Rx),
            other => Err(SmokeError::Validation(format!(
                "invalid fire 'type': {other}"
            ))),
        }
    }
}

impl From<FireType> for String {
    fn from(value: FireType) -> String {
        match value {
            FireType::Wildfire => "wildfire".to_string(),
            FireType::Rx => "rx".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FuelType {
    #[default]
    Natural,
    Activity,
    Piles,
}

impl TryFrom<String> for FuelType {
    type Error = SmokeError;

    fn try_from(value: String) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "natural" => Ok(FuelType::Natural),
            "activity" => Ok(FuelType::Activity),
            "piles" => Ok(FuelType::Piles),
            other => Err(SmokeError::Validation(format!(
                "invalid fire 'fuel_type': {other}"
            ))),
        }
    }
}

impl From<FuelType> for String {
    fn from(value: FuelType) -> String {
        match value {
            FuelType::Natural => "natural",
            FuelType::Activity => "activity",
            FuelType::Piles => "piles",
        }
        .to_string()
    }
}

/// A fire's footprint: either a single point with an area, or a polygon
/// perimeter (ring of `[lng, lat]` vertices) from which a representative
/// point is derived as the centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Point {
        latitude: f64,
        longitude: f64,
        area: f64,
    },
    Perimeter {
        perimeter: Vec<[f64; 2]>,
        area: f64,
    },
}

impl Location {
    pub fn latitude(&self) -> Result<f64> {
        match self {
            Location::Point { latitude, .. } => Ok(*latitude),
            Location::Perimeter { perimeter, .. } => Ok(Self::centroid(perimeter)?.1),
        }
    }

    pub fn longitude(&self) -> Result<f64> {
        match self {
            Location::Point { longitude, .. } => Ok(*longitude),
            Location::Perimeter { perimeter, .. } => Ok(Self::centroid(perimeter)?.0),
        }
    }

    pub fn area(&self) -> f64 {
        match self {
            Location::Point { area, .. } | Location::Perimeter { area, .. } => *area,
        }
    }

    pub fn area_mut(&mut self) -> &mut f64 {
        match self {
            Location::Point { area, .. } | Location::Perimeter { area, .. } => area,
        }
    }

    /// Vertex centroid `(lng, lat)` of a perimeter ring, ignoring a
    /// duplicated closing vertex.
    fn centroid(perimeter: &[[f64; 2]]) -> Result<(f64, f64)> {
        let ring = match perimeter {
            [] => {
                return Err(SmokeError::Validation(
                    "empty perimeter; insufficient location data".to_string(),
                ))
            }
            [rest @ .., last] if rest.first() == Some(last) => rest,
            all => all,
        };
        let n = ring.len() as f64;
        let (sum_lng, sum_lat) = ring
            .iter()
            .fold((0.0, 0.0), |(x, y), p| (x + p[0], y + p[1]));
        Ok((sum_lng / n, sum_lat / n))
    }
}

/// Per-hour vertical distribution of smoke emissions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlumeriseHour {
    /// Height bin edges, meters; one more entry than `emission_fractions`.
    pub heights: Vec<f64>,
    pub emission_fractions: Vec<f64>,
    pub smolder_fraction: f64,
}

pub type HourlySeries<T> = BTreeMap<NaiveDateTime, T>;

/// A time interval carrying a percentage of the fire's total area, plus
/// optional per-window hourly series attached by upstream modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localmet: Option<HourlySeries<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeprofile: Option<HourlySeries<BTreeMap<String, f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plumerise: Option<HourlySeries<PlumeriseHour>>,
}

/// Error annotation attached to a fire that failed a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireFailure {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub traceback: String,
}

impl FireFailure {
    pub fn from_error(e: &SmokeError) -> Self {
        FireFailure {
            kind: e.kind().to_string(),
            message: e.to_string(),
            traceback: format!("{e:?}"),
        }
    }
}

fn generated_id() -> String {
    // 8 hex chars is enough to disambiguate within a run
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn is_false(b: &bool) -> bool {
    !b
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FireRecord {
    /// Public identifier; generated when absent from input. Multiple
    /// records may share an id prior to merging (one per reporting day).
    pub id: String,

    /// Private identity distinguishing same-`id` records. Never
    /// serialized; a fresh one is generated on deserialization.
    #[serde(skip, default = "Uuid::new_v4")]
    private_id: Uuid,

    /// Ids of the source records folded into this one across merges.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub original_source_ids: BTreeSet<String>,

    #[serde(rename = "type")]
    pub fire_type: FireType,
    pub fuel_type: FuelType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_of: Option<EventRef>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub activity: Vec<ActivityWindow>,

    /// Free-form key/value bag attached by ingestion.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,

    // Flat fields carried by dispersion-ready records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub plumerise: HourlySeries<PlumeriseHour>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub timeprofile: HourlySeries<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub timeprofiled_area: HourlySeries<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub timeprofiled_emissions: HourlySeries<BTreeMap<String, f64>>,

    #[serde(skip_serializing_if = "NestedMap::is_empty")]
    pub consumption: NestedMap,
    #[serde(skip_serializing_if = "NestedMap::is_empty")]
    pub emissions: NestedMap,
    #[serde(skip_serializing_if = "NestedMap::is_empty")]
    pub heat: NestedMap,

    /// Placeholder fires synthesized to pad out tranches.
    #[serde(skip_serializing_if = "is_false")]
    pub is_dummy: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FireFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Default for FireRecord {
    fn default() -> Self {
        FireRecord {
            id: generated_id(),
            private_id: Uuid::new_v4(),
            original_source_ids: BTreeSet::new(),
            fire_type: FireType::default(),
            fuel_type: FuelType::default(),
            location: None,
            event_of: None,
            activity: Vec::new(),
            meta: BTreeMap::new(),
            start: None,
            end: None,
            utc_offset: None,
            plumerise: BTreeMap::new(),
            timeprofile: BTreeMap::new(),
            timeprofiled_area: BTreeMap::new(),
            timeprofiled_emissions: BTreeMap::new(),
            consumption: NestedMap::new(),
            emissions: NestedMap::new(),
            heat: NestedMap::new(),
            is_dummy: false,
            error: None,
        }
    }
}

impl FireRecord {
    pub fn new() -> Self {
        FireRecord::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        FireRecord {
            id: id.into(),
            ..FireRecord::default()
        }
    }

    /// Identity that survives public-id collisions. Two records built from
    /// the same input data are still distinct.
    pub fn private_id(&self) -> Uuid {
        self.private_id
    }

    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| SmokeError::Validation(format!("malformed fire record: {e}")))
    }

    pub fn to_json(&self) -> Value {
        // serialization of a record cannot fail: all map keys are strings
        // or datetimes
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Representative latitude; derived from the perimeter centroid when
    /// the location is a polygon.
    pub fn latitude(&self) -> Result<f64> {
        self.location
            .as_ref()
            .ok_or_else(|| Self::no_location(&self.id))?
            .latitude()
    }

    pub fn longitude(&self) -> Result<f64> {
        self.location
            .as_ref()
            .ok_or_else(|| Self::no_location(&self.id))?
            .longitude()
    }

    pub fn area(&self) -> Result<f64> {
        Ok(self
            .location
            .as_ref()
            .ok_or_else(|| Self::no_location(&self.id))?
            .area())
    }

    fn no_location(id: &str) -> SmokeError {
        SmokeError::Validation(format!(
            "insufficient location data for single lat/lng of fire {id}"
        ))
    }

    /// The set of source ids this record represents; falls back to the
    /// record's own id when it hasn't been merged yet.
    pub fn source_ids(&self) -> BTreeSet<String> {
        if self.original_source_ids.is_empty() {
            std::iter::once(self.id.clone()).collect()
        } else {
            self.original_source_ids.clone()
        }
    }

    /// Checks structural invariants: a usable location, and activity
    /// percentages summing to 100 within tolerance.
    pub fn validate(&self) -> Result<()> {
        self.latitude()?;
        self.longitude()?;
        if !self.activity.is_empty() {
            let total: f64 = self.activity.iter().map(|w| w.pct).sum();
            if (total - 100.0).abs() > PCT_TOLERANCE {
                return Err(SmokeError::Validation(format!(
                    "activity percentages of fire {} sum to {total}, not 100",
                    self.id
                )));
            }
            for w in &self.activity {
                if w.end <= w.start {
                    return Err(SmokeError::Validation(format!(
                        "activity window of fire {} ends before it starts",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn record_failure(&mut self, e: &SmokeError) {
        self.error = Some(FireFailure::from_error(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = FireRecord::new();
        let b = FireRecord::new();
        assert_ne!(a.id, b.id);
        assert_ne!(a.private_id(), b.private_id());
    }

    #[test]
    fn same_id_records_have_distinct_private_ids() {
        let a = FireRecord::with_id("sf-1");
        let b = FireRecord::with_id("sf-1");
        assert_eq!(a.id, b.id);
        assert_ne!(a.private_id(), b.private_id());
    }

    #[test]
    fn fire_type_aliases() {
        let f: FireRecord =
            serde_json::from_value(json!({"id": "a", "type": "WF"})).unwrap();
        assert_eq!(f.fire_type, FireType::Wildfire);
        let bad: std::result::Result<FireRecord, _> =
            serde_json::from_value(json!({"id": "a", "type": "campfire"}));
        assert!(bad.is_err());
    }

    #[test]
    fn point_and_perimeter_locations() {
        let point = Location::Point {
            latitude: 45.0,
            longitude: -118.0,
            area: 120.0,
        };
        assert_eq!(point.latitude().unwrap(), 45.0);

        // closed square ring around (45.5, -118.5)
        let perim = Location::Perimeter {
            perimeter: vec![
                [-119.0, 45.0],
                [-118.0, 45.0],
                [-118.0, 46.0],
                [-119.0, 46.0],
                [-119.0, 45.0],
            ],
            area: 200.0,
        };
        assert!((perim.latitude().unwrap() - 45.5).abs() < 1e-10);
        assert!((perim.longitude().unwrap() + 118.5).abs() < 1e-10);
    }

    #[test]
    fn missing_location_is_validation_error() {
        let f = FireRecord::new();
        assert!(matches!(
            f.latitude(),
            Err(SmokeError::Validation(_))
        ));
    }

    #[test]
    fn activity_pct_must_sum_to_100() {
        let mut f = FireRecord::new();
        f.location = Some(Location::Point {
            latitude: 45.0,
            longitude: -118.0,
            area: 100.0,
        });
        f.activity = vec![
            ActivityWindow {
                start: dt("2019-08-01T00:00:00"),
                end: dt("2019-08-02T00:00:00"),
                pct: 60.0,
                localmet: None,
                timeprofile: None,
                plumerise: None,
            },
            ActivityWindow {
                start: dt("2019-08-02T00:00:00"),
                end: dt("2019-08-03T00:00:00"),
                pct: 40.0,
                localmet: None,
                timeprofile: None,
                plumerise: None,
            },
        ];
        assert!(f.validate().is_ok());

        f.activity[1].pct = 50.0;
        assert!(f.validate().is_err());
    }

    #[test]
    fn serialization_omits_private_id_and_empty_fields() {
        let f = FireRecord::with_id("abc");
        let v = f.to_json();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.get("id"), Some(&json!("abc")));
        assert_eq!(obj.get("type"), Some(&json!("wildfire")));
        assert!(!obj.contains_key("private_id"));
        assert!(!obj.contains_key("activity"));
        assert!(!obj.contains_key("consumption"));
    }
}
