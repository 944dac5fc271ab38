//! Smoke Pipeline Core Library
//!
//! State machine and merge/tranche engines for a wildfire smoke modeling
//! pipeline. Fire records flow through an ordered list of modules; the
//! core provides the collection itself, fire filtering and merging, and
//! the preparation of per-process tranches and sampling grids for a
//! downstream dispersion model.
//!
//! ## Pipeability
//!
//! A run's output is valid input for a subsequent run: `FiresManager`
//! loads and dumps the same JSON shape, with run metadata carried
//! through untouched.

// Pipeline state and fire records
pub mod fires;

// Merge engines
pub mod merge;

// Tranching and grid sizing for dispersion runs
pub mod disperse;

// Shared plumbing
pub mod config;
pub mod datautils;
pub mod error;
pub mod pipeline;

// Re-export the main entry points
pub use config::RunConfig;
pub use disperse::{DispersionPlan, GridParams, MetInfo};
pub use error::{Result, SmokeError};
pub use fires::{FireRecord, FiresManager};
pub use merge::{FireMerger, PlumeMerger};
pub use pipeline::{Module, ModuleKind, ModuleRegistry, CORE_VERSION};
