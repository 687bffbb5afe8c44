/// Compact human duration: `250ms`, `1.5s`, `2m05s`, `1h02m`.
pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    match ms {
        0..=999 => format!("{}ms", ms),
        1_000..=59_999 => format!("{:.1}s", ms as f64 / 1000.0),
        60_000..=3_599_999 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, secs % 3600 / 60),
    }
}

/// Synthesis spend, shown in lineage summaries. Sub-cent amounts keep
/// four decimals so a handful of short completions does not read as zero.
pub fn format_cost(usd: f64) -> String {
    let decimals = if usd.abs() < 0.01 { 4 } else { 2 };
    format!("${:.*}", decimals, usd.abs())
}
