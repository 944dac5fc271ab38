//! Config-driven removal of fires into the filtered list.
//!
//! Filters never drop fires silently: every removed record is appended to
//! `filtered_fires`. Bad filter configuration either fails the stage or,
//! with `skip_failures`, is skipped.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::FilterConfig;
use crate::error::{Result, SmokeError};
use crate::fires::manager::FiresManager;
use crate::fires::record::FireRecord;
use crate::pipeline::CORE_VERSION;

pub struct FiresFilter {
    config: FilterConfig,
}

pub fn run_module(fires_manager: &mut FiresManager) -> Result<()> {
    let filter = FiresFilter::new(fires_manager.config().filter.clone());
    let num_filtered = filter.apply(fires_manager)?;
    fires_manager.processed(
        "filter",
        CORE_VERSION,
        Some(serde_json::json!({ "num_filtered": num_filtered })),
    );
    Ok(())
}

impl FiresFilter {
    pub fn new(config: FilterConfig) -> Self {
        FiresFilter { config }
    }

    /// Applies all configured filters, returning the number of fires moved
    /// to the filtered list.
    pub fn apply(&self, fires_manager: &mut FiresManager) -> Result<usize> {
        if self.config.fields.is_empty()
            && self.config.location.is_none()
            && self.config.area.is_none()
        {
            if self.config.skip_failures {
                debug!("no filters specified; nothing to do");
                return Ok(0);
            }
            return Err(SmokeError::Filter("no filters specified".to_string()));
        }

        let mut num_filtered = 0;
        for (field, field_filter) in &self.config.fields {
            match Self::field_predicate(field, field_filter) {
                Ok(pred) => num_filtered += Self::remove_matching(fires_manager, &pred)?,
                Err(e) if self.config.skip_failures => {
                    warn!(field, error = %e, "skipping invalid field filter");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(boundary) = self.config.location {
            if boundary.sw.lat >= boundary.ne.lat || boundary.sw.lng >= boundary.ne.lng {
                let e = SmokeError::Filter(
                    "location filter boundary is degenerate".to_string(),
                );
                if self.config.skip_failures {
                    warn!(error = %e, "skipping location filter");
                } else {
                    return Err(e);
                }
            } else {
                let skip_failures = self.config.skip_failures;
                num_filtered += Self::remove_matching(fires_manager, &move |f: &FireRecord| {
                    match (f.latitude(), f.longitude()) {
                        (Ok(lat), Ok(lng)) => Ok(!boundary.contains(lat, lng)),
                        (Err(e), _) | (_, Err(e)) if !skip_failures => Err(e),
                        // unlocatable fires are left in place when skipping
                        _ => Ok(false),
                    }
                })?;
            }
        }

        if let Some(area) = &self.config.area {
            if area.min.is_none() && area.max.is_none() {
                let e =
                    SmokeError::Filter("area filter requires min and/or max".to_string());
                if self.config.skip_failures {
                    warn!(error = %e, "skipping area filter");
                } else {
                    return Err(e);
                }
            } else {
                let (min, max) = (area.min, area.max);
                let skip_failures = self.config.skip_failures;
                num_filtered += Self::remove_matching(fires_manager, &move |f: &FireRecord| {
                    match f.area() {
                        Ok(a) => Ok(min.is_some_and(|m| a < m) || max.is_some_and(|m| a > m)),
                        Err(e) if !skip_failures => Err(e),
                        _ => Ok(false),
                    }
                })?;
            }
        }

        Ok(num_filtered)
    }

    /// Predicate returning true when a fire should be removed by a
    /// per-field allow/deny filter.
    fn field_predicate(
        field: &str,
        filter: &crate::config::FieldFilter,
    ) -> Result<impl Fn(&FireRecord) -> Result<bool>> {
        let (whitelist, blacklist) = (filter.whitelist.clone(), filter.blacklist.clone());
        if whitelist.is_some() == blacklist.is_some() {
            return Err(SmokeError::Filter(format!(
                "specify whitelist or blacklist for field '{field}' - not both"
            )));
        }
        let field = field.to_string();
        Ok(move |fire: &FireRecord| {
            let value = fire.meta.get(&field);
            Ok(match (&whitelist, &blacklist) {
                (Some(allowed), _) => !value.is_some_and(|v| allowed.contains(v)),
                (_, Some(denied)) => value.is_some_and(|v| denied.contains(v)),
                _ => false,
            })
        })
    }

    fn remove_matching(
        fires_manager: &mut FiresManager,
        predicate: &dyn Fn(&FireRecord) -> Result<bool>,
    ) -> Result<usize> {
        let mut to_remove: Vec<(String, Uuid)> = Vec::new();
        for fire in fires_manager.fires() {
            if predicate(fire)? {
                to_remove.push((fire.id.clone(), fire.private_id()));
            }
        }
        let count = to_remove.len();
        for (id, private_id) in to_remove {
            if let Some(fire) = fires_manager.remove_fire(&id, private_id) {
                debug!(fire = %fire.id, "filtered out fire");
                fires_manager.filtered_fires.push(fire);
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AreaFilter, BoundaryConfig, FieldFilter, LatLng, RunConfig};
    use crate::fires::record::Location;
    use serde_json::json;

    fn fire(id: &str, lat: f64, lng: f64, area: f64) -> FireRecord {
        let mut f = FireRecord::with_id(id);
        f.location = Some(Location::Point {
            latitude: lat,
            longitude: lng,
            area,
        });
        f
    }

    fn manager_with_fires() -> FiresManager {
        let mut mgr = FiresManager::new(RunConfig::default());
        let mut a = fire("a", 45.0, -118.0, 100.0);
        a.meta.insert("country".to_string(), json!("USA"));
        let mut b = fire("b", 60.0, -100.0, 5.0);
        b.meta.insert("country".to_string(), json!("CA"));
        mgr.add_fire(a);
        mgr.add_fire(b);
        mgr
    }

    #[test]
    fn no_filters_is_an_error_unless_skipping() {
        let mut mgr = manager_with_fires();
        let strict = FiresFilter::new(FilterConfig::default());
        assert!(strict.apply(&mut mgr).is_err());

        let lenient = FiresFilter::new(FilterConfig {
            skip_failures: true,
            ..FilterConfig::default()
        });
        assert_eq!(lenient.apply(&mut mgr).unwrap(), 0);
    }

    #[test]
    fn whitelist_removes_non_matching() {
        let mut mgr = manager_with_fires();
        let mut config = FilterConfig::default();
        config.fields.insert(
            "country".to_string(),
            FieldFilter {
                whitelist: Some(vec![json!("USA")]),
                blacklist: None,
            },
        );
        let n = FiresFilter::new(config).apply(&mut mgr).unwrap();
        assert_eq!(n, 1);
        assert_eq!(mgr.fire_count(), 1);
        assert_eq!(mgr.fires()[0].id, "a");
        assert_eq!(mgr.filtered_fires.len(), 1);
        assert_eq!(mgr.filtered_fires[0].id, "b");
    }

    #[test]
    fn blacklist_removes_matching() {
        let mut mgr = manager_with_fires();
        let mut config = FilterConfig::default();
        config.fields.insert(
            "country".to_string(),
            FieldFilter {
                whitelist: None,
                blacklist: Some(vec![json!("USA")]),
            },
        );
        FiresFilter::new(config).apply(&mut mgr).unwrap();
        assert_eq!(mgr.fires()[0].id, "b");
    }

    #[test]
    fn whitelist_and_blacklist_together_rejected() {
        let mut mgr = manager_with_fires();
        let mut config = FilterConfig::default();
        config.fields.insert(
            "country".to_string(),
            FieldFilter {
                whitelist: Some(vec![json!("USA")]),
                blacklist: Some(vec![json!("CA")]),
            },
        );
        assert!(FiresFilter::new(config).apply(&mut mgr).is_err());
    }

    #[test]
    fn location_filter_drops_outside_boundary() {
        let mut mgr = manager_with_fires();
        let config = FilterConfig {
            location: Some(BoundaryConfig {
                sw: LatLng { lat: 40.0, lng: -125.0 },
                ne: LatLng { lat: 50.0, lng: -110.0 },
            }),
            ..FilterConfig::default()
        };
        FiresFilter::new(config).apply(&mut mgr).unwrap();
        assert_eq!(mgr.fire_count(), 1);
        assert_eq!(mgr.fires()[0].id, "a");
    }

    #[test]
    fn area_filter_bounds() {
        let mut mgr = manager_with_fires();
        let config = FilterConfig {
            area: Some(AreaFilter {
                min: Some(50.0),
                max: None,
            }),
            ..FilterConfig::default()
        };
        FiresFilter::new(config).apply(&mut mgr).unwrap();
        assert_eq!(mgr.fire_count(), 1);
        assert_eq!(mgr.fires()[0].id, "a");
    }
}
