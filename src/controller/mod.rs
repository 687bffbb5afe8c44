//! The CEGIR loop: BUILD -> EXECUTE -> CLASSIFY -> REFINE over one plan lineage.

pub mod orchestrator;
pub mod setup;
pub mod state;

pub use orchestrator::{CegirController, LoopDependencies};
pub use setup::{lineage_id, run_lineage, LineageRequest, LoopServices};
pub use state::{ControllerConfig, LoopEvent, LoopOutcome, LoopState};
