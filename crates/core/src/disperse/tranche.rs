//! Partitioning of fires into per-process tranches.
//!
//! Fires sharing a public id form an indivisible set; sets are dealt
//! out to processes with any remainder front-loaded, and short runs are
//! padded with synthetic placeholder fires so every process has work.

use chrono::{Duration, NaiveDateTime};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::DispersionConfig;
use crate::disperse::grid::GridParams;
use crate::fires::record::{FireRecord, Location, PlumeriseHour};

pub const DUMMY_EMISSIONS_SPECIES: [&str; 11] = [
    "pm2.5", "pm10", "co", "co2", "ch4", "nox", "nh3", "so2", "voc", "pm", "nmhc",
];
pub const DUMMY_EMISSIONS_VALUE: f64 = 0.000_01;
pub const DUMMY_PHASES: [&str; 3] = ["flaming", "smoldering", "residual"];
pub const DUMMY_TIMEPROFILE_FIELDS: [&str; 4] =
    ["area_fraction", "flaming", "smoldering", "residual"];
pub const DUMMY_PLUMERISE_LEVELS: usize = 20;
pub const DUMMY_HOURS: usize = 24;

/// Groups fires by public id, preserving first-occurrence order. Each
/// returned set must be dispatched to a single process.
pub fn create_fire_sets(fires: Vec<FireRecord>) -> Vec<Vec<FireRecord>> {
    let mut order: Vec<String> = Vec::new();
    let mut sets: FxHashMap<String, Vec<FireRecord>> = FxHashMap::default();
    for fire in fires {
        let entry = sets.entry(fire.id.clone()).or_default();
        if entry.is_empty() {
            order.push(fire.id.clone());
        }
        entry.push(fire);
    }
    order
        .into_iter()
        .filter_map(|id| sets.remove(&id))
        .collect()
}

/// Process count for a run with `num_fire_sets` indivisible sets.
///
/// An explicit `num_processes` is honored but never exceeds the set
/// count; otherwise `num_fires_per_process` drives the count, capped by
/// `num_processes_max`. When particle files are carried between runs
/// the count is floored at the configured values so file sets line up
/// run to run.
pub fn compute_num_processes(num_fire_sets: usize, config: &DispersionConfig) -> usize {
    let num_fire_sets = num_fire_sets.max(1);
    let mut num_processes = if config.num_processes >= 1 {
        num_fire_sets.min(config.num_processes)
    } else if config.num_fires_per_process >= 1 {
        let n = num_fire_sets.div_ceil(config.num_fires_per_process);
        if config.num_processes_max >= 1 {
            n.min(config.num_processes_max)
        } else {
            n
        }
    } else {
        1
    };

    if config.parinit_or_pardump {
        num_processes = num_processes
            .max(config.num_processes)
            .max(config.num_processes_max);
    }

    debug!(num_fire_sets, num_processes, "computed process count");
    num_processes
}

/// Deals fire sets out to at most `num_processes` tranches in order,
/// clamping to the set count so no tranche comes back empty. When the
/// set count doesn't divide evenly, earlier tranches take one extra set.
pub fn create_fire_tranches(
    fire_sets: Vec<Vec<FireRecord>>,
    num_processes: usize,
) -> Vec<Vec<FireRecord>> {
    let num_processes = num_processes.clamp(1, fire_sets.len().max(1));
    let base = fire_sets.len() / num_processes;
    let extra = fire_sets.len() % num_processes;

    let mut tranches: Vec<Vec<FireRecord>> = Vec::with_capacity(num_processes);
    let mut sets = fire_sets.into_iter();
    for i in 0..num_processes {
        let take = base + usize::from(i < extra);
        let mut tranche = Vec::new();
        for _ in 0..take {
            if let Some(set) = sets.next() {
                tranche.extend(set);
            }
        }
        tranches.push(tranche);
    }
    tranches
}

/// Synthesizes a negligible-emissions placeholder fire at the grid
/// center, spanning `num_hours` from `model_start`.
pub fn generate_dummy_fire(
    model_start: NaiveDateTime,
    num_hours: usize,
    grid_params: &GridParams,
) -> FireRecord {
    info!("generating dummy fire");
    let num_hours = num_hours.max(1);
    let mut fire = FireRecord::new();
    fire.is_dummy = true;
    fire.location = Some(Location::Point {
        latitude: grid_params.center_latitude,
        longitude: grid_params.center_longitude,
        area: 1.0,
    });
    fire.utc_offset = Some(0.0);
    fire.start = Some(model_start);
    fire.end = Some(model_start + Duration::hours(num_hours as i64));

    for phase in DUMMY_PHASES {
        for species in DUMMY_EMISSIONS_SPECIES {
            fire.emissions
                .set_leaf(&[phase, species], DUMMY_EMISSIONS_VALUE);
        }
    }

    let heights: Vec<f64> = (0..=DUMMY_PLUMERISE_LEVELS)
        .map(|n| 1000.0 + 100.0 * n as f64)
        .collect();
    let fractions = vec![1.0 / DUMMY_PLUMERISE_LEVELS as f64; DUMMY_PLUMERISE_LEVELS];
    let hourly_fraction = 1.0 / num_hours as f64;

    for h in 0..num_hours {
        let dt = model_start + Duration::hours(h as i64);
        fire.plumerise.insert(
            dt,
            PlumeriseHour {
                heights: heights.clone(),
                emission_fractions: fractions.clone(),
                smolder_fraction: 0.0,
            },
        );
        fire.timeprofile.insert(
            dt,
            DUMMY_TIMEPROFILE_FIELDS
                .iter()
                .map(|f| ((*f).to_string(), hourly_fraction))
                .collect(),
        );
    }
    fire
}

/// Pads the fire-set list with single-dummy sets so that every one of
/// `num_processes` processes will have at least one fire to run after
/// tranching. Real sets are never replaced, only appended to.
pub fn fill_in_dummy_fires(
    fire_sets: &mut Vec<Vec<FireRecord>>,
    num_processes: usize,
    model_start: NaiveDateTime,
    num_hours: usize,
    grid_params: &GridParams,
) {
    while fire_sets.len() < num_processes {
        fire_sets.push(vec![generate_dummy_fire(model_start, num_hours, grid_params)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn fire(id: &str) -> FireRecord {
        FireRecord::with_id(id)
    }

    fn config(
        num_processes: usize,
        num_fires_per_process: usize,
        num_processes_max: usize,
    ) -> DispersionConfig {
        DispersionConfig {
            num_processes,
            num_fires_per_process,
            num_processes_max,
            ..DispersionConfig::default()
        }
    }

    fn grid() -> GridParams {
        GridParams {
            center_latitude: 45.0,
            center_longitude: -118.0,
            height_latitude: 2.0,
            width_longitude: 2.0,
            spacing_latitude: 0.1,
            spacing_longitude: 0.1,
        }
    }

    #[test]
    fn fire_sets_group_by_id_in_first_occurrence_order() {
        let fires = vec![
            fire("a"),
            fire("b"),
            fire("a"),
            fire("c"),
            fire("b"),
            fire("d"),
            fire("a"),
            fire("e"),
            fire("c"),
        ];
        let sets = create_fire_sets(fires);
        let ids: Vec<&str> = sets.iter().map(|s| s[0].id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d", "e"]);
        let sizes: Vec<usize> = sets.iter().map(Vec::len).collect();
        assert_eq!(sizes, [3, 2, 2, 1, 1]);
    }

    #[test]
    fn explicit_process_count_capped_by_set_count() {
        assert_eq!(compute_num_processes(6, &config(4, 0, 0)), 4);
        assert_eq!(compute_num_processes(3, &config(4, 0, 0)), 3);
    }

    #[test]
    fn fires_per_process_drives_count() {
        assert_eq!(compute_num_processes(6, &config(0, 2, 0)), 3);
        assert_eq!(compute_num_processes(7, &config(0, 2, 0)), 4);
        assert_eq!(compute_num_processes(7, &config(0, 2, 3)), 3);
        // neither knob set
        assert_eq!(compute_num_processes(7, &config(0, 0, 0)), 1);
        // zero sets still means one process
        assert_eq!(compute_num_processes(0, &config(0, 0, 0)), 1);
    }

    #[test]
    fn particle_file_carryover_floors_process_count() {
        let mut cfg = config(4, 0, 6);
        cfg.parinit_or_pardump = true;
        // min(2, 4) = 2 would misalign particle files; floored at max(2, 4, 6)
        assert_eq!(compute_num_processes(2, &cfg), 6);
    }

    #[test]
    fn tranches_front_load_the_remainder() {
        let sets: Vec<Vec<FireRecord>> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| vec![fire(id)])
            .collect();
        let tranches = create_fire_tranches(sets, 3);
        let sizes: Vec<usize> = tranches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [2, 1, 1]);
        assert_eq!(tranches[0][0].id, "a");
        assert_eq!(tranches[0][1].id, "b");
        assert_eq!(tranches[1][0].id, "c");
        assert_eq!(tranches[2][0].id, "d");
    }

    #[test]
    fn tranching_never_splits_a_set() {
        let sets = vec![
            vec![fire("a"), fire("a"), fire("a")],
            vec![fire("b")],
            vec![fire("c"), fire("c")],
        ];
        let tranches = create_fire_tranches(sets, 2);
        assert_eq!(tranches.len(), 2);
        assert!(tranches[0].iter().all(|f| f.id == "a" || f.id == "b"));
        assert!(tranches[1].iter().all(|f| f.id == "c"));
    }

    #[test]
    fn dummy_fire_shape() {
        let start = NaiveDate::from_ymd_opt(2026, 8, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let dummy = generate_dummy_fire(start, 24, &grid());
        assert!(dummy.is_dummy);
        assert_eq!(dummy.latitude().unwrap(), 45.0);
        assert_eq!(dummy.plumerise.len(), 24);
        assert_eq!(dummy.timeprofile.len(), 24);

        let hour = dummy.plumerise.get(&start).unwrap();
        assert_eq!(hour.heights.len(), 21);
        assert_eq!(hour.heights[0], 1000.0);
        assert_eq!(hour.heights[20], 3000.0);
        assert_eq!(hour.emission_fractions.len(), 20);
        let total: f64 = hour.emission_fractions.iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);

        let profile = dummy.timeprofile.get(&start).unwrap();
        assert_relative_eq!(profile["flaming"], 1.0 / 24.0, epsilon = 1e-12);
        assert_eq!(
            dummy.emissions.get_leaf(&["flaming", "pm2.5"]),
            Some(DUMMY_EMISSIONS_VALUE)
        );
    }

    #[test]
    fn tranche_count_clamped_to_set_count() {
        let sets: Vec<Vec<FireRecord>> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| vec![fire(id)])
            .collect();
        let tranches = create_fire_tranches(sets, 10);
        assert_eq!(tranches.len(), 4);
        assert!(tranches.iter().all(|t| !t.is_empty()));
    }

    #[test]
    fn dummy_sets_pad_short_runs() {
        let start = NaiveDate::from_ymd_opt(2026, 8, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut sets = vec![vec![fire("a")], vec![fire("b")]];
        fill_in_dummy_fires(&mut sets, 4, start, 24, &grid());
        assert_eq!(sets.len(), 4);

        let tranches = create_fire_tranches(sets, 4);
        assert_eq!(tranches.len(), 4);
        assert!(!tranches[0][0].is_dummy);
        assert!(!tranches[1][0].is_dummy);
        assert!(tranches[2][0].is_dummy);
        assert!(tranches[3][0].is_dummy);
    }
}
