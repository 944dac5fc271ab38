//! Dispersion run preparation.
//!
//! Takes dispersion-ready fires and produces the inputs a dispersion
//! model process pool needs: identity-merged (and optionally
//! plume-merged) fires, a resolved sampling grid, and per-process
//! tranches padded with placeholder fires. Running the model itself is
//! out of scope for the core.

pub mod grid;
pub mod tranche;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::DispersionConfig;
use crate::error::{Result, SmokeError};
use crate::fires::manager::FiresManager;
use crate::fires::record::FireRecord;
use crate::merge::{FireMerger, PlumeMerger};
use crate::pipeline::CORE_VERSION;

pub use grid::{get_grid_params, GridParams, MetInfo};

/// Everything derived in preparation for a dispersion run.
#[derive(Debug, Serialize)]
pub struct DispersionPlan {
    pub model_start: NaiveDateTime,
    pub num_hours: usize,
    pub num_processes: usize,
    pub grid_params: GridParams,
    pub tranches: Vec<Vec<FireRecord>>,
}

impl DispersionPlan {
    pub fn fires(&self) -> impl Iterator<Item = &FireRecord> {
        self.tranches.iter().flatten()
    }
}

/// Builds the dispersion plan for a fire collection.
///
/// Fires are identity-merged first, then bucket-merged onto the plume
/// merge grid when one is configured. The sampling grid must resolve;
/// a run with no fires after merging still produces one dummy-filled
/// tranche per process.
pub fn prepare(
    fires: Vec<FireRecord>,
    config: &DispersionConfig,
    met_info: Option<&MetInfo>,
) -> Result<DispersionPlan> {
    let initial = fires.len();
    let mut fires = FireMerger::merge(fires)?;
    if let Some(plume_grid) = &config.plume_merge {
        fires = PlumeMerger::new(plume_grid)?.merge(fires)?;
    }
    if fires.len() < initial {
        info!(
            before = initial,
            after = fires.len(),
            "merged fires for dispersion"
        );
    }

    let grid_params = get_grid_params(config, met_info, &fires, false)?
        .ok_or_else(|| SmokeError::Config("specify a dispersion grid".to_string()))?;

    let model_start = config
        .model_start
        .or_else(|| fires.iter().filter_map(|f| f.start).min())
        .ok_or_else(|| {
            SmokeError::Config(
                "model_start must be configured when no fire defines a start time".to_string(),
            )
        })?;
    let num_hours = if config.num_hours >= 1 {
        config.num_hours
    } else {
        tranche::DUMMY_HOURS
    };

    let mut fire_sets = tranche::create_fire_sets(fires);
    let num_processes = tranche::compute_num_processes(fire_sets.len(), config);
    tranche::fill_in_dummy_fires(
        &mut fire_sets,
        num_processes,
        model_start,
        num_hours,
        &grid_params,
    );
    let tranches = tranche::create_fire_tranches(fire_sets, num_processes);

    Ok(DispersionPlan {
        model_start,
        num_hours,
        num_processes,
        grid_params,
        tranches,
    })
}

/// `dispersion` pipeline module: computes the plan and records it in
/// the run metadata, leaving the fire collection itself untouched.
pub fn run_module(fires_manager: &mut FiresManager) -> Result<()> {
    let met_info = parse_met_info(fires_manager);
    let fires: Vec<FireRecord> = fires_manager.fires().into_iter().cloned().collect();
    let config = fires_manager.config().dispersion.clone();

    let plan = prepare(fires, &config, met_info.as_ref())?;
    let tranche_sizes: Vec<usize> = plan.tranches.iter().map(Vec::len).collect();
    let num_dummies = plan.fires().filter(|f| f.is_dummy).count();
    info!(
        num_processes = plan.num_processes,
        ?tranche_sizes,
        num_dummies,
        "prepared dispersion run"
    );

    let extra = json!({
        "model_start": plan.model_start,
        "num_hours": plan.num_hours,
        "num_processes": plan.num_processes,
        "tranche_sizes": tranche_sizes,
        "num_dummy_fires": num_dummies,
        "grid_params": serde_json::to_value(plan.grid_params)
            .map_err(|e| SmokeError::Config(e.to_string()))?,
    });
    fires_manager.processed("dispersion", CORE_VERSION, Some(extra));
    Ok(())
}

/// Grid-relevant met metadata, if ingestion attached any. Malformed
/// blocks are ignored rather than failing the run.
fn parse_met_info(fires_manager: &FiresManager) -> Option<MetInfo> {
    let met = fires_manager.meta().get("met")?;
    match serde_json::from_value::<MetInfo>(met.clone()) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, "ignoring unparseable met metadata");
            None
        }
    }
}
