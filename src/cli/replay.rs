use std::path::PathBuf;
use console::style;
use similar::{ChangeTag, TextDiff};
use crate::audit::{read_summary, read_trace, LineageSummary, TRACE_FILE};
use crate::cli::commands::ReplayArgs;
use crate::cli::progress::style_verdict;
use crate::errors::CegirError;
use crate::models::{Plan, Trace};
use crate::store::PlanStore;
use crate::utils::formatting::format_duration;

pub async fn handle_replay(args: ReplayArgs, quiet: bool) -> Result<i32, CegirError> {
    let dir = PathBuf::from(&args.lineage_dir);
    let lineage = dir.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CegirError::Input(format!("{} is not a lineage directory", dir.display())))?
        .to_string();
    let root = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let plans = PlanStore::load_lineage(&root, &lineage).await?;
    if plans.is_empty() {
        return Err(CegirError::Input(format!("No committed plans under {}", dir.display())));
    }
    let trace = read_trace(&dir.join(TRACE_FILE)).await?;
    let summary = read_summary(&dir).await.ok();
    let issues = check_consistency(&plans, &trace, summary.as_ref());

    if args.json {
        let value = serde_json::json!({
            "lineage": lineage,
            "summary": summary,
            "plans": plans.len(),
            "trace": trace,
            "issues": issues,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !quiet {
        print_history(&lineage, summary.as_ref(), &plans, &trace);
        if args.diff {
            print_diffs(&plans)?;
        }
    }

    if issues.is_empty() {
        Ok(0)
    } else {
        if !quiet && !args.json {
            for issue in &issues {
                eprintln!("  {} {}", style("✗").red(), issue);
            }
        }
        Err(CegirError::Store(format!(
            "Trace and plan store of {} disagree ({} issue(s))", lineage, issues.len()
        )))
    }
}

/// Cross-check the trace stream against the committed plan history.
pub fn check_consistency(plans: &[Plan], trace: &Trace, summary: Option<&LineageSummary>) -> Vec<String> {
    let mut issues = Vec::new();
    let mut refinements = 0;

    for (i, record) in trace.records.iter().enumerate() {
        let expected = i as u32 + 1;
        if record.iteration != expected {
            issues.push(format!("record {} has iteration {}", expected, record.iteration));
        }
        if record.plan_version as usize >= plans.len() {
            issues.push(format!("iteration {} used uncommitted plan v{}", record.iteration, record.plan_version));
        }
        if let Some(refinement) = &record.refinement {
            refinements += 1;
            if refinement.next_version != record.plan_version + 1 {
                issues.push(format!(
                    "iteration {} refined v{} into v{}",
                    record.iteration, record.plan_version, refinement.next_version
                ));
            }
        }
        if let Some(next) = trace.records.get(i + 1) {
            let refined_to = record.refinement.as_ref().map(|r| r.next_version);
            if refined_to != Some(next.plan_version) {
                issues.push(format!(
                    "iteration {} ran plan v{} but the previous iteration committed {}",
                    next.iteration,
                    next.plan_version,
                    refined_to.map(|v| format!("v{}", v)).unwrap_or_else(|| "nothing".into())
                ));
            }
        }
    }

    if let Some(first) = trace.records.first() {
        if first.plan_version != 0 {
            issues.push(format!("first iteration ran plan v{}, not the seed", first.plan_version));
        }
    }
    if plans.len() != refinements + 1 {
        issues.push(format!(
            "{} plan(s) committed but the trace records {} refinement(s)", plans.len(), refinements
        ));
    }

    if let Some(summary) = summary {
        if summary.iterations as usize != trace.len() {
            issues.push(format!(
                "summary counts {} iteration(s), trace holds {}", summary.iterations, trace.len()
            ));
        }
        if summary.verdict.is_some() && summary.final_plan_version as usize + 1 != plans.len() {
            issues.push(format!(
                "summary names final plan v{}, store holds v0..v{}",
                summary.final_plan_version, plans.len() - 1
            ));
        }
    }
    issues
}

fn print_history(lineage: &str, summary: Option<&LineageSummary>, plans: &[Plan], trace: &Trace) {
    println!("{} {}", style("Lineage").bold(), style(lineage).cyan());
    if let Some(summary) = summary {
        println!("  Spec:    {}", summary.spec_id);
        match summary.verdict {
            Some(verdict) => println!("  Verdict: {}", style_verdict(verdict)),
            None => println!("  Verdict: {}", style("unfinished").dim()),
        }
        if let Some(ms) = summary.duration_ms {
            println!("  Took:    {}", format_duration(ms));
        }
    }
    println!("  Plans:   v0..v{}", plans.len().saturating_sub(1));
    println!();

    for record in &trace.records {
        let mut line = format!(
            "  #{:<3} v{:<3} {}",
            record.iteration, record.plan_version, style_verdict(record.verdict)
        );
        if let Some(location) = &record.hit_location {
            line.push_str(&format!(" at {}", location));
        }
        if record.executed {
            line.push_str(&format!(" ({} paths)", record.paths_explored));
        }
        println!("{}", line);
        for rejected in &record.rejected {
            println!(
                "        {} {} #{}: {}",
                style("rejected").dim(), rejected.source, rejected.attempt, rejected.reasons.join("; ")
            );
        }
        if let Some(refinement) = &record.refinement {
            println!(
                "        {} v{} {}: {}",
                style("→").cyan(), refinement.next_version, refinement.applied, refinement.description
            );
        }
        if let Some(error) = &record.error {
            println!("        {} {}", style("error").red(), error);
        }
    }
}

fn print_diffs(plans: &[Plan]) -> Result<(), CegirError> {
    for pair in plans.windows(2) {
        println!();
        println!("{}", style(format!("--- v{} -> v{}", pair[0].version, pair[1].version)).bold());
        print!("{}", plan_diff(&pair[0], &pair[1])?);
    }
    Ok(())
}

/// Unified line diff of two plans' JSON, without the version and provenance noise.
pub fn plan_diff(before: &Plan, after: &Plan) -> Result<String, CegirError> {
    let old = comparable_json(before)?;
    let new = comparable_json(after)?;
    let diff = TextDiff::from_lines(&old, &new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let line = match change.tag() {
            ChangeTag::Delete => style(format!("-{}", change)).red().to_string(),
            ChangeTag::Insert => style(format!("+{}", change)).green().to_string(),
            ChangeTag::Equal => continue,
        };
        out.push_str(&line);
    }
    Ok(out)
}

fn comparable_json(plan: &Plan) -> Result<String, CegirError> {
    let mut value = serde_json::to_value(plan)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("version");
        map.remove("provenance");
    }
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    Ok(text)
}
