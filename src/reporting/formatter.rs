use std::path::{Path, PathBuf};
use crate::audit::atomic_write;
use crate::controller::LoopOutcome;
use crate::errors::CegirError;
use crate::models::{Plan, Trace, Verdict, VulnerabilitySpec};
use crate::utils::formatting::{format_cost, format_duration};

pub const REPORT_FILE: &str = "report.md";

pub fn format_plan_markdown(plan: &Plan) -> String {
    let mut out = format!("### Plan v{}\n\n", plan.version);
    match &plan.assertion {
        Some(a) => out.push_str(&format!("**Assertion:** `{}` at {}\n\n", a.text, a.location)),
        None => out.push_str("**Assertion:** none\n\n"),
    }

    out.push_str("**Driver:**\n```c\n");
    for call in &plan.driver.calls {
        out.push_str(&call.render());
        out.push('\n');
    }
    out.push_str("```\n\n");

    if !plan.symbolic_inputs.is_empty() {
        out.push_str("| Input | Type | Injection | Range |\n|---|---|---|---|\n");
        for input in &plan.symbolic_inputs {
            let ty = match input.len {
                Some(n) => format!("{}[{}]", input.ty, n),
                None => input.ty.clone(),
            };
            let range = if input.is_ranged() {
                format!(
                    "{}..{}",
                    input.min.map(|v| v.to_string()).unwrap_or_default(),
                    input.max.map(|v| v.to_string()).unwrap_or_default(),
                )
            } else {
                "-".to_string()
            };
            out.push_str(&format!("| `{}` | `{}` | {} | {} |\n", input.name, ty, input.injection, range));
        }
        out.push('\n');
    }

    if !plan.stubs.is_empty() {
        out.push_str("| Stub | Returns | Behavior |\n|---|---|---|\n");
        for (name, stub) in &plan.stubs {
            out.push_str(&format!("| `{}` | `{}` | {} |\n", name, stub.return_type, stub.behavior.label()));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "**Budget:** {}s, {} MB, {} instructions, build {}s\n",
        plan.budget.time_secs, plan.budget.max_memory_mb, plan.budget.max_instructions, plan.budget.build_timeout_secs,
    ));
    out
}

pub fn format_trace_table(trace: &Trace) -> String {
    let mut out = String::from("| # | Plan | Verdict | Paths | Hit | Refinement |\n|---|---|---|---|---|---|\n");
    for r in &trace.records {
        let verdict = match (r.cause, &r.build_failure) {
            (Some(cause), _) => format!("{} ({:?})", r.verdict, cause),
            (None, Some(failure)) => format!("{} ({})", r.verdict, failure.as_str()),
            (None, None) => r.verdict.to_string(),
        };
        let hit = r.hit_location.as_ref().map(|l| l.to_string()).unwrap_or_else(|| "-".into());
        let refinement = match (&r.refinement, &r.error) {
            (Some(s), _) => format!("{} -> v{}", s.applied, s.next_version),
            (None, Some(e)) => format!("error: {}", e.replace('|', "/")),
            (None, None) => "-".to_string(),
        };
        out.push_str(&format!(
            "| {} | v{} | {} | {} | {} | {} |\n",
            r.iteration, r.plan_version, verdict, r.paths_explored, hit, refinement
        ));
    }
    out
}

/// Human-readable summary of a finished lineage.
pub fn format_verdict_report(outcome: &LoopOutcome, spec: &VulnerabilitySpec) -> String {
    let mut out = format!("# Verification Report: {}\n\n", spec.id);
    out.push_str(&format!("- Lineage: `{}`\n", outcome.lineage));
    out.push_str(&format!("- Claim: {} at {} in `{}`\n", spec.bug_class, spec.site(), spec.function));
    out.push_str(&format!("- Verdict: **{}**\n", outcome.verdict));
    out.push_str(&format!("- Iterations: {}\n", outcome.iterations()));
    out.push_str(&format!("- Duration: {}\n", format_duration(outcome.duration_ms)));
    if let Some(cost) = outcome.synthesis_cost_usd {
        out.push_str(&format!("- Synthesis cost: {}\n", format_cost(cost)));
    }
    if let Some(error) = &outcome.error {
        out.push_str(&format!("- Error: {}\n", error));
    }
    out.push('\n');

    match outcome.verdict {
        Verdict::Green => {
            out.push_str("## Reproduction\n\nThe injected assertion fired at the reported site.\n\n");
            let counterexample = outcome.trace.last().and_then(|r| r.counterexample.as_ref());
            if let Some(cx) = counterexample {
                out.push_str("| Input | Value |\n|---|---|\n");
                for value in &cx.values {
                    let shown = value.int.map(|v| v.to_string()).unwrap_or_else(|| value.hex.clone());
                    out.push_str(&format!("| `{}` | `{}` |\n", value.name, shown));
                }
                out.push('\n');
            }
        }
        Verdict::BudgetExhausted => {
            out.push_str("## No Reproduction\n\nThe iteration budget ran out before the site was reached.\n\n");
        }
        _ => {}
    }

    out.push_str("## History\n\n");
    out.push_str(&format_trace_table(&outcome.trace));
    out.push_str("\n## Final Plan\n\n");
    out.push_str(&format_plan_markdown(&outcome.plan));
    out
}

/// Write `report.md` into the lineage directory.
pub async fn write_report(
    lineage_dir: &Path,
    outcome: &LoopOutcome,
    spec: &VulnerabilitySpec,
) -> Result<PathBuf, CegirError> {
    let path = lineage_dir.join(REPORT_FILE);
    atomic_write(&path, &format_verdict_report(outcome, spec)).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use chrono::Utc;
    use crate::models::spec::{BugClass, FactPack};
    use crate::models::{
        Counterexample, ExecutionBudget, InputValue, RefinementMove, RefinementSummary, SourceLocation,
        Timings, TraceRecord,
    };

    fn spec() -> VulnerabilitySpec {
        VulnerabilitySpec {
            id: "r-1".into(),
            file: "src/parser.c".into(),
            function: "parse_record".into(),
            line: 11,
            bug_class: BugClass::OutOfBoundsWrite,
            evidence: vec![],
            facts: FactPack::default(),
            assertion_hint: None,
        }
    }

    fn record(iteration: u32, verdict: Verdict) -> TraceRecord {
        TraceRecord {
            iteration,
            plan_version: iteration - 1,
            verdict,
            cause: None,
            build_failure: None,
            executed: true,
            outcome: None,
            paths_explored: 4,
            hit_location: None,
            counterexample: None,
            timings: Timings::default(),
            refinement: None,
            rejected: vec![],
            error: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_green_report_lists_counterexample_and_history() {
        let mut first = record(1, Verdict::NoReproduction);
        first.refinement = Some(RefinementSummary {
            applied: RefinementMove::WidenStubRange,
            description: "widen".into(),
            next_version: 1,
        });
        let mut second = record(2, Verdict::Green);
        second.hit_location = Some(SourceLocation::new("src/parser.c", 11));
        second.counterexample = Some(Counterexample {
            values: vec![InputValue { name: "len".into(), hex: "0x40".into(), int: Some(64) }],
        });
        let plan = Plan::seed(&spec(), ExecutionBudget::default());
        let outcome = LoopOutcome {
            lineage: "r-1-abc".into(),
            verdict: Verdict::Green,
            plan: Arc::new(plan),
            trace: Trace { records: vec![first, second] },
            error: None,
            duration_ms: 1500,
            synthesis_cost_usd: Some(0.004),
        };

        let report = format_verdict_report(&outcome, &spec());
        assert!(report.contains("Verdict: **GREEN**"));
        assert!(report.contains("| `len` | `64` |"));
        assert!(report.contains("widen_stub_range -> v1"));
        assert!(report.contains("src/parser.c:11"));
        assert!(report.contains("Synthesis cost: $0.0040"));
        assert!(report.contains("### Plan v0"));
    }
}
