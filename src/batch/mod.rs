//! Many specs verified concurrently, one independent lineage each.

use std::path::PathBuf;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use crate::audit::atomic_write;
use crate::config::CegirConfig;
use crate::controller::{run_lineage, LineageRequest, LoopEvent, LoopServices};
use crate::errors::CegirError;
use crate::models::Verdict;
use tracing::{error, info, warn};

pub const BATCH_FILE: &str = "batch.json";

/// Result of one spec in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Spec file the lineage was started from.
    pub source: PathBuf,
    pub spec_id: Option<String>,
    pub lineage: Option<String>,
    pub verdict: Option<Verdict>,
    pub iterations: u32,
    pub exit_code: i32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub entries: Vec<BatchEntry>,
}

impl BatchSummary {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.entries.iter().filter(|e| e.verdict == Some(verdict)).count()
    }

    /// Most severe lineage exit code: cancelled, infrastructure error,
    /// unexpected error, invalid input, budget exhausted, then GREEN.
    pub fn exit_code(&self) -> i32 {
        const SEVERITY: [i32; 5] = [130, 4, 1, 2, 3];
        SEVERITY.into_iter()
            .find(|code| self.entries.iter().any(|e| e.exit_code == *code))
            .unwrap_or(0)
    }
}

/// A spec to run, or the error that stopped it from loading.
pub struct BatchInput {
    pub source: PathBuf,
    pub request: Result<LineageRequest, CegirError>,
}

/// Run every input with at most `concurrency` lineages in flight. Lineages
/// share adapters and the plan store but no mutable state.
pub async fn run_batch(
    inputs: Vec<BatchInput>,
    config: Arc<CegirConfig>,
    services: LoopServices,
    concurrency: usize,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<LoopEvent>>,
) -> BatchSummary {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    info!(specs = inputs.len(), concurrency = concurrency.max(1), "Batch started");

    let handles: Vec<_> = inputs.into_iter().map(|input| {
        let semaphore = semaphore.clone();
        let config = config.clone();
        let services = services.clone();
        let cancel = cancel.clone();
        let events = events.clone();

        tokio::spawn(async move {
            let source = input.source;
            let request = match input.request {
                Ok(request) => request,
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "Spec could not be loaded");
                    return failed_entry(source, None, &e);
                }
            };
            let spec_id = request.spec.id.clone();

            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let e = CegirError::Internal("Batch semaphore closed".into());
                    return failed_entry(source, Some(spec_id), &e);
                }
            };
            if cancel.is_cancelled() {
                return BatchEntry {
                    source,
                    spec_id: Some(spec_id),
                    lineage: None,
                    verdict: Some(Verdict::Cancelled),
                    iterations: 0,
                    exit_code: Verdict::Cancelled.exit_code(),
                    error: None,
                    report: None,
                };
            }

            match run_lineage(request, &config, &services, cancel, events).await {
                Ok((outcome, report)) => BatchEntry {
                    source,
                    spec_id: Some(spec_id),
                    lineage: Some(outcome.lineage.clone()),
                    verdict: Some(outcome.verdict),
                    iterations: outcome.iterations(),
                    exit_code: outcome.exit_code(),
                    error: outcome.error,
                    report,
                },
                Err(e) => {
                    warn!(spec = %spec_id, error = %e, "Lineage failed to run");
                    failed_entry(source, Some(spec_id), &e)
                }
            }
        })
    }).collect();

    let results = futures::future::join_all(handles).await;
    let mut summary = BatchSummary::default();
    for result in results {
        match result {
            Ok(entry) => summary.entries.push(entry),
            Err(e) => {
                error!(error = %e, "Lineage task panicked");
                summary.entries.push(BatchEntry {
                    source: PathBuf::new(),
                    spec_id: None,
                    lineage: None,
                    verdict: None,
                    iterations: 0,
                    exit_code: 1,
                    error: Some(e.to_string()),
                    report: None,
                });
            }
        }
    }

    info!(
        specs = summary.entries.len(),
        green = summary.count(Verdict::Green),
        exhausted = summary.count(Verdict::BudgetExhausted),
        infra = summary.count(Verdict::InfraError),
        "Batch finished"
    );
    if let Err(e) = write_summary(&services.output_dir, &summary).await {
        warn!(error = %e, "Failed to write batch summary");
    }
    summary
}

fn failed_entry(source: PathBuf, spec_id: Option<String>, e: &CegirError) -> BatchEntry {
    BatchEntry {
        source,
        spec_id,
        lineage: None,
        verdict: None,
        iterations: 0,
        exit_code: e.exit_code(),
        error: Some(e.to_string()),
        report: None,
    }
}

async fn write_summary(output_dir: &std::path::Path, summary: &BatchSummary) -> Result<(), CegirError> {
    tokio::fs::create_dir_all(output_dir).await?;
    let json = serde_json::to_string_pretty(summary)?;
    atomic_write(&output_dir.join(BATCH_FILE), &json).await
}
