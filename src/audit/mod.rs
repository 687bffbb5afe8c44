pub mod session;
pub mod trace_logger;
pub mod workflow_logger;
pub mod metrics_tracker;
pub mod utils;

pub use session::AuditSession;
pub use metrics_tracker::{read_summary, LineageSummary, FINAL_FILE};
pub use trace_logger::{read_trace, TRACE_FILE};
pub use utils::atomic_write;
