use std::path::PathBuf;
use std::sync::Arc;
use console::style;
use tokio::sync::mpsc;
use crate::batch::{run_batch, BatchInput};
use crate::cli::commands::BatchArgs;
use crate::cli::load_config;
use crate::cli::progress::style_verdict;
use crate::cli::verify::{cancel_on_ctrl_c, spawn_progress};
use crate::controller::{LineageRequest, LoopServices};
use crate::errors::CegirError;
use crate::models::{BuildDescription, VulnerabilitySpec};
use tracing::info;

pub async fn handle_batch(args: BatchArgs, quiet: bool) -> Result<i32, CegirError> {
    let config = load_config(&args.run).await?;
    let build_path = PathBuf::from(&args.build);
    let description = BuildDescription::load(&build_path).await?;

    let specs = expand_specs(&args.specs)?;
    if specs.is_empty() {
        return Err(CegirError::Input("No spec files matched".into()));
    }
    info!(specs = specs.len(), "Loading specs");

    let mut inputs = Vec::with_capacity(specs.len());
    for path in specs {
        let request = VulnerabilitySpec::load(&path).await.map(|spec| LineageRequest {
            spec,
            description: description.clone(),
            seed: None,
            lineage: None,
            iterations: None,
        });
        inputs.push(BatchInput { source: path, request });
    }

    let mounts = vec![std::env::current_dir()?.join(&description.source_root)];
    let services = LoopServices::from_config(
        &config,
        args.run.prompts_dir.as_ref().map(PathBuf::from),
        mounts,
    ).await?;
    let concurrency = args.concurrency.unwrap_or_else(|| config.concurrency());

    let (events, progress) = if quiet || args.json {
        (None, None)
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(spawn_progress(rx)))
    };
    let summary = run_batch(inputs, Arc::new(config), services, concurrency, cancel_on_ctrl_c(), events).await;
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        println!();
        println!("{}", style("Batch results").bold());
        for entry in &summary.entries {
            let verdict = entry.verdict
                .map(style_verdict)
                .unwrap_or_else(|| style("ERROR").red().bold().to_string());
            let name = entry.spec_id.clone().unwrap_or_else(|| entry.source.display().to_string());
            let detail = match (&entry.lineage, &entry.error) {
                (_, Some(error)) => error.clone(),
                (Some(lineage), None) => format!("{} ({} iterations)", lineage, entry.iterations),
                (None, None) => String::new(),
            };
            println!("  {:<18} {:<32} {}", verdict, name, detail);
        }
    }

    Ok(summary.exit_code())
}

/// Expand glob patterns; plain paths are kept as given.
fn expand_specs(patterns: &[String]) -> Result<Vec<PathBuf>, CegirError> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if !pattern.contains(['*', '?', '[']) {
            paths.push(PathBuf::from(pattern));
            continue;
        }
        let matches = glob::glob(pattern)
            .map_err(|e| CegirError::Input(format!("Bad spec pattern {}: {}", pattern, e)))?;
        let mut matched: Vec<PathBuf> = matches.filter_map(Result::ok).collect();
        matched.sort();
        paths.extend(matched);
    }
    paths.dedup();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_specs_globs_and_plain_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let pattern = dir.path().join("*.json").to_string_lossy().to_string();
        let paths = expand_specs(&[pattern, "missing.json".to_string()]).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths[0].ends_with("a.json"));
        assert!(paths[1].ends_with("b.json"));
        assert_eq!(paths[2], PathBuf::from("missing.json"));
    }
}
