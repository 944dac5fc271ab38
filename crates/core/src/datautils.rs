//! Nested numeric data handling shared by the merge engines and the
//! run-summary bookkeeping.
//!
//! Consumption, emissions and heat values are nested mappings keyed by
//! category -> subcategory -> phase with numeric leaves. Merging fires
//! sums matching keys recursively; unmatched keys pass through unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SmokeError};

/// A nested string-keyed mapping with numeric leaves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestedMap(pub BTreeMap<String, NestedValue>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NestedValue {
    Number(f64),
    Map(NestedMap),
}

impl NestedMap {
    pub fn new() -> Self {
        NestedMap(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Inserts a numeric leaf at an arbitrary nesting depth, creating
    /// intermediate maps as needed.
    pub fn set_leaf(&mut self, keys: &[&str], value: f64) {
        debug_assert!(!keys.is_empty());
        if keys.len() == 1 {
            self.0
                .insert(keys[0].to_string(), NestedValue::Number(value));
        } else {
            let entry = self
                .0
                .entry(keys[0].to_string())
                .or_insert_with(|| NestedValue::Map(NestedMap::new()));
            if let NestedValue::Map(m) = entry {
                m.set_leaf(&keys[1..], value);
            } else {
                *entry = NestedValue::Map(NestedMap::new());
                if let NestedValue::Map(m) = entry {
                    m.set_leaf(&keys[1..], value);
                }
            }
        }
    }

    pub fn get_leaf(&self, keys: &[&str]) -> Option<f64> {
        match (keys.len(), self.0.get(*keys.first()?)) {
            (1, Some(NestedValue::Number(n))) => Some(*n),
            (_, Some(NestedValue::Map(m))) => m.get_leaf(&keys[1..]),
            _ => None,
        }
    }

    /// Recursively sums two nested mappings. Keys present in only one of
    /// the two pass through unchanged; keys present in both must agree on
    /// structure (both numbers or both maps).
    pub fn sum(&self, other: &NestedMap) -> Result<NestedMap> {
        let mut out = self.0.clone();
        for (k, v) in &other.0 {
            match out.get_mut(k) {
                None => {
                    out.insert(k.clone(), v.clone());
                }
                Some(NestedValue::Number(a)) => {
                    if let NestedValue::Number(b) = v {
                        *a += b;
                    } else {
                        return Err(SmokeError::Merge(format!(
                            "mismatched nesting under key '{k}'"
                        )));
                    }
                }
                Some(NestedValue::Map(a)) => {
                    if let NestedValue::Map(b) = v {
                        *a = a.sum(b)?;
                    } else {
                        return Err(SmokeError::Merge(format!(
                            "mismatched nesting under key '{k}'"
                        )));
                    }
                }
            }
        }
        Ok(NestedMap(out))
    }

    /// Multiplies every numeric leaf in place.
    pub fn scale(&mut self, multiplier: f64) {
        for v in self.0.values_mut() {
            match v {
                NestedValue::Number(n) => *n *= multiplier,
                NestedValue::Map(m) => m.scale(multiplier),
            }
        }
    }

    /// Sum of all numeric leaves.
    pub fn total(&self) -> f64 {
        self.0
            .values()
            .map(|v| match v {
                NestedValue::Number(n) => *n,
                NestedValue::Map(m) => m.total(),
            })
            .sum()
    }
}

/// Merges `b` into `a`, retaining nested keys in `a` that aren't in `b`
/// and replacing any common scalar keys with `b`'s value.
///
/// Used for accumulating free-form run summaries, so it operates on raw
/// JSON values rather than [`NestedMap`].
pub fn deepmerge(a: &mut Value, b: &Value) {
    match (a, b) {
        (Value::Object(a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                match a_map.get_mut(k) {
                    Some(a_val) => deepmerge(a_val, b_val),
                    None => {
                        a_map.insert(k.clone(), b_val.clone());
                    }
                }
            }
        }
        (a_val, b_val) => {
            *a_val = b_val.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(v: Value) -> NestedMap {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn sum_matching_and_passthrough_keys() {
        let a = nested(json!({"canopy": {"flaming": 1.0, "smoldering": 2.0}, "heat": 5.0}));
        let b = nested(json!({"canopy": {"flaming": 3.0}, "shrub": {"residual": 1.5}}));
        let summed = a.sum(&b).unwrap();
        assert_eq!(summed.get_leaf(&["canopy", "flaming"]), Some(4.0));
        assert_eq!(summed.get_leaf(&["canopy", "smoldering"]), Some(2.0));
        assert_eq!(summed.get_leaf(&["shrub", "residual"]), Some(1.5));
        assert_eq!(summed.get_leaf(&["heat"]), Some(5.0));
    }

    #[test]
    fn sum_rejects_mismatched_structure() {
        let a = nested(json!({"canopy": 1.0}));
        let b = nested(json!({"canopy": {"flaming": 1.0}}));
        assert!(a.sum(&b).is_err());
    }

    #[test]
    fn scale_and_total() {
        let mut m = nested(json!({"a": {"b": 2.0}, "c": 3.0}));
        m.scale(2.0);
        assert_eq!(m.get_leaf(&["a", "b"]), Some(4.0));
        assert_eq!(m.total(), 10.0);
    }

    #[test]
    fn deepmerge_replaces_scalars_keeps_disjoint() {
        let mut a = json!({"x": {"y": 1, "z": 2}, "k": 3});
        deepmerge(&mut a, &json!({"x": {"y": 10}, "new": 4}));
        assert_eq!(a, json!({"x": {"y": 10, "z": 2}, "k": 3, "new": 4}));
    }

    #[test]
    fn nested_serde_round_trip() {
        let m = nested(json!({"canopy": {"overstory": {"flaming": 0.5}}}));
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v, json!({"canopy": {"overstory": {"flaming": 0.5}}}));
    }
}
