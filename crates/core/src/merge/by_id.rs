//! Manager-level merge of records sharing a public id.
//!
//! Ingestion emits one record per reporting day, all carrying the same
//! fire id. Before the scientific modules run, those records are folded
//! into one, combining areas and rescaling activity percentages by area
//! share so they still sum to 100.

use tracing::debug;

use crate::config::StageConfig;
use crate::error::{Result, SmokeError};
use crate::fires::manager::FiresManager;
use crate::fires::record::FireRecord;
use crate::pipeline::CORE_VERSION;

pub struct FiresByIdMerger {
    skip_failures: bool,
}

pub fn run_module(fires_manager: &mut FiresManager) -> Result<()> {
    let merger = FiresByIdMerger::new(&fires_manager.config().merge.clone());
    let num_merged = merger.merge(fires_manager)?;
    fires_manager.processed(
        "merge",
        CORE_VERSION,
        Some(serde_json::json!({ "num_merged": num_merged })),
    );
    Ok(())
}

impl FiresByIdMerger {
    pub fn new(config: &StageConfig) -> Self {
        FiresByIdMerger {
            skip_failures: config.skip_failures,
        }
    }

    /// Merges every id with more than one record, returning the number of
    /// records folded away.
    pub fn merge(&self, fires_manager: &mut FiresManager) -> Result<usize> {
        let candidate_ids: Vec<String> = fires_manager
            .fire_ids()
            .iter()
            .filter(|id| fires_manager.fires_with_id(id).len() > 1)
            .cloned()
            .collect();

        let mut num_merged = 0;
        for id in candidate_ids {
            num_merged += self.merge_fire_id(fires_manager, &id)?;
        }
        Ok(num_merged)
    }

    /// Iterates once through the records for an id, in order, folding each
    /// into the in-progress combined record. A single pass can miss exotic
    /// merge opportunities, but checking every pair would not pay for
    /// itself on real data.
    fn merge_fire_id(&self, fires_manager: &mut FiresManager, id: &str) -> Result<usize> {
        let records = fires_manager.fires_with_id(id).to_vec();
        let mut combined: Option<FireRecord> = None;
        let mut absorbed = Vec::new();
        let mut num_merged = 0;

        for fire in records {
            let attempt = Self::check_and_combine(combined.as_ref(), &fire);
            match attempt {
                Ok(new_combined) => {
                    if combined.is_some() {
                        num_merged += 1;
                    }
                    absorbed.push((fire.id.clone(), fire.private_id()));
                    combined = Some(new_combined);
                }
                Err(e) if self.skip_failures => {
                    debug!(fire = %fire.id, error = %e, "leaving unmergeable record in place");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(combined) = combined {
            for (fire_id, private_id) in absorbed {
                fires_manager.remove_fire(&fire_id, private_id);
            }
            fires_manager.add_fire(combined);
        }
        Ok(num_merged)
    }

    fn check_and_combine(
        combined: Option<&FireRecord>,
        fire: &FireRecord,
    ) -> Result<FireRecord> {
        Self::check_stage(fire)?;
        if let Some(combined) = combined {
            Self::check_location(fire, combined)?;
            Self::check_activity_windows(fire, combined)?;
            Self::check_event_of(fire, combined)?;
            Self::check_types(fire, combined)?;
            Self::combine(combined, fire)
        } else {
            Ok(fire.clone())
        }
    }

    fn fail(fire: &FireRecord, sub_msg: &str) -> SmokeError {
        SmokeError::Merge(format!(
            "failed to merge fire {} ({}): {sub_msg}",
            fire.id,
            fire.private_id()
        ))
    }

    /// Only just-ingested records can be merged; anything carrying
    /// per-stage results would need those results recombined too.
    fn check_stage(fire: &FireRecord) -> Result<()> {
        if fire.location.is_none() {
            return Err(Self::fail(fire, "no location"));
        }
        if !fire.consumption.is_empty()
            || !fire.emissions.is_empty()
            || !fire.heat.is_empty()
            || !fire.plumerise.is_empty()
            || !fire.timeprofiled_area.is_empty()
            || !fire.timeprofiled_emissions.is_empty()
        {
            return Err(Self::fail(fire, "record already carries module results"));
        }
        Ok(())
    }

    fn check_location(fire: &FireRecord, combined: &FireRecord) -> Result<()> {
        if fire.latitude()? != combined.latitude()? || fire.longitude()? != combined.longitude()? {
            return Err(Self::fail(fire, "locations don't match"));
        }
        Ok(())
    }

    fn check_activity_windows(fire: &FireRecord, combined: &FireRecord) -> Result<()> {
        if fire.activity.is_empty() != combined.activity.is_empty() {
            return Err(Self::fail(
                fire,
                "activity windows must be defined for both fires or neither",
            ));
        }
        Ok(())
    }

    fn check_event_of(fire: &FireRecord, combined: &FireRecord) -> Result<()> {
        if let (Some(a), Some(b)) = (&fire.event_of, &combined.event_of) {
            if a.id != b.id {
                return Err(Self::fail(fire, "fire event ids don't match"));
            }
        }
        Ok(())
    }

    fn check_types(fire: &FireRecord, combined: &FireRecord) -> Result<()> {
        if fire.fire_type != combined.fire_type {
            return Err(Self::fail(fire, "fire types don't match"));
        }
        if fire.fuel_type != combined.fuel_type {
            return Err(Self::fail(fire, "fuel types don't match"));
        }
        Ok(())
    }

    fn combine(combined: &FireRecord, fire: &FireRecord) -> Result<FireRecord> {
        let mut new_combined = combined.clone();
        let combined_area = combined.area()?;
        let new_area = combined_area + fire.area()?;
        if let Some(loc) = new_combined.location.as_mut() {
            *loc.area_mut() = new_area;
        }

        if !new_combined.activity.is_empty() {
            // rescale percentages by each side's share of the new area
            let combined_factor = combined_area / new_area;
            for w in &mut new_combined.activity {
                w.pct *= combined_factor;
            }
            let fire_factor = 1.0 - combined_factor;
            for w in &fire.activity {
                let mut w = w.clone();
                w.pct *= fire_factor;
                new_combined.activity.push(w);
            }
            new_combined.activity.sort_by_key(|w| w.start);
        }

        if let Some(event) = &fire.event_of {
            new_combined.event_of.get_or_insert_with(|| event.clone());
        }
        Ok(new_combined)
    }
}
