pub mod plan_store;

pub use plan_store::{PlanStore, validate_lineage_id};
