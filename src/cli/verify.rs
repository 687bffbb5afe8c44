use std::path::PathBuf;
use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::cli::commands::VerifyArgs;
use crate::cli::load_config;
use crate::cli::progress::{style_verdict, LoopProgress};
use crate::controller::{run_lineage, LineageRequest, LoopEvent, LoopServices};
use crate::errors::CegirError;
use crate::utils::formatting::{format_cost, format_duration};
use tracing::{info, warn};

pub async fn handle_verify(args: VerifyArgs, quiet: bool) -> Result<i32, CegirError> {
    let config = load_config(&args.run).await?;
    let mut request = LineageRequest::load(
        &PathBuf::from(&args.spec),
        &PathBuf::from(&args.build),
        args.seed.as_deref().map(std::path::Path::new),
    ).await?;
    request.lineage = args.lineage.clone();
    info!(spec = %request.spec.id, site = %request.spec.site(), "Verifying vulnerability report");

    let mounts = vec![std::env::current_dir()?.join(&request.description.source_root)];
    let services = LoopServices::from_config(
        &config,
        args.run.prompts_dir.as_ref().map(PathBuf::from),
        mounts,
    ).await?;

    let cancel = cancel_on_ctrl_c();
    let (events, progress) = if quiet || args.json {
        (None, None)
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(spawn_progress(rx)))
    };

    let result = run_lineage(request, &config, &services, cancel, events).await;
    if let Some(handle) = progress {
        let _ = handle.await;
    }
    let (outcome, report) = result?;

    if args.json {
        let value = serde_json::json!({
            "lineage": outcome.lineage,
            "verdict": outcome.verdict,
            "exit_code": outcome.exit_code(),
            "plan": &*outcome.plan,
            "trace": outcome.trace,
            "error": outcome.error,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !quiet {
        println!();
        println!("{} {}", style("Verdict:").bold(), style_verdict(outcome.verdict));
        println!("  Lineage:    {}", outcome.lineage);
        println!("  Iterations: {}", outcome.iterations());
        println!("  Plan:       v{}", outcome.plan.version);
        println!("  Duration:   {}", format_duration(outcome.duration_ms));
        if let Some(cost) = outcome.synthesis_cost_usd {
            println!("  Synthesis:  {}", format_cost(cost));
        }
        if let Some(error) = &outcome.error {
            println!("  Error:      {}", style(error).red());
        }
        if let Some(path) = &report {
            println!("  Report:     {}", path.display());
        }
    }

    Ok(outcome.exit_code())
}

/// Cancel `token` on the first ctrl-c. The loop stops at its next state boundary.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current step");
            handle.cancel();
        }
    });
    token
}

pub fn spawn_progress(mut rx: mpsc::UnboundedReceiver<LoopEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut progress = LoopProgress::new();
        while let Some(event) = rx.recv().await {
            progress.handle_event(&event);
        }
        progress.finish();
    })
}
