pub mod formatter;

pub use formatter::{format_plan_markdown, format_trace_table, format_verdict_report, write_report, REPORT_FILE};
