//! Fire records and the pipeline state that carries them.

pub mod filter;
pub mod manager;
pub mod record;

pub use filter::FiresFilter;
pub use manager::FiresManager;
pub use record::{ActivityWindow, FireFailure, FireRecord, FireType, FuelType, Location};
