use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::errors::CegirError;
use crate::models::{TraceRecord, Verdict, VulnerabilitySpec};
use super::metrics_tracker::MetricsTracker;
use super::trace_logger::TraceLogger;
use super::workflow_logger::WorkflowLogger;

/// Crash-safe audit trail of one lineage under `<output>/<lineage>/`:
/// `workflow.log`, `trace.jsonl` and `final.json`.
pub struct AuditSession {
    base_dir: PathBuf,
    lineage: String,
    metrics: Arc<Mutex<MetricsTracker>>,
    workflow_logger: Arc<Mutex<WorkflowLogger>>,
    trace_logger: Arc<Mutex<TraceLogger>>,
}

impl AuditSession {
    pub async fn initialize(output_dir: &Path, lineage: &str) -> Result<Self, CegirError> {
        let base_dir = output_dir.join(lineage);
        tokio::fs::create_dir_all(&base_dir).await?;

        let metrics = MetricsTracker::new(&base_dir, lineage);
        let workflow_logger = WorkflowLogger::new(&base_dir);
        workflow_logger.initialize(lineage).await?;
        let trace_logger = TraceLogger::new(&base_dir).await?;

        Ok(Self {
            base_dir,
            lineage: lineage.to_string(),
            metrics: Arc::new(Mutex::new(metrics)),
            workflow_logger: Arc::new(Mutex::new(workflow_logger)),
            trace_logger: Arc::new(Mutex::new(trace_logger)),
        })
    }

    pub async fn lineage_started(&self, spec: &VulnerabilitySpec, budget: u32) -> Result<(), CegirError> {
        {
            let mut metrics = self.metrics.lock().await;
            metrics.start(&spec.id, budget);
            metrics.save().await?;
        }
        self.log(&format!(
            "Lineage started: spec {} ({} at {}), budget {} iterations",
            spec.id, spec.bug_class, spec.site(), budget
        )).await
    }

    pub async fn record_iteration(&self, record: &TraceRecord) -> Result<(), CegirError> {
        self.trace_logger.lock().await.append(record).await?;
        self.metrics.lock().await.record_iteration(record.iteration, record.plan_version);
        let mut line = format!(
            "Iteration {} (plan v{}): {}",
            record.iteration, record.plan_version, record.verdict
        );
        if let Some(cause) = record.cause {
            line.push_str(&format!(" [{:?}]", cause));
        }
        if let Some(location) = &record.hit_location {
            line.push_str(&format!(" hit at {}", location));
        }
        for rejected in &record.rejected {
            line.push_str(&format!(
                "\n    rejected {} candidate #{}: {}",
                rejected.source, rejected.attempt, rejected.reasons.join("; ")
            ));
        }
        if let Some(refinement) = &record.refinement {
            line.push_str(&format!(
                "\n    {} -> v{}: {}",
                refinement.applied, refinement.next_version, refinement.description
            ));
        }
        if let Some(error) = &record.error {
            line.push_str(&format!("\n    error: {}", error));
        }
        self.log(&line).await
    }

    pub async fn plan_committed(&self, version: u32) -> Result<(), CegirError> {
        self.log(&format!("Plan v{} committed", version)).await
    }

    pub async fn lineage_finished(
        &self,
        verdict: Verdict,
        plan_version: u32,
        duration_ms: u64,
        synthesis_cost_usd: Option<f64>,
        error: Option<String>,
    ) -> Result<(), CegirError> {
        self.log(&format!(
            "Lineage finished: {} with plan v{} after {}ms",
            verdict, plan_version, duration_ms
        )).await?;
        self.metrics.lock().await
            .finish(verdict, plan_version, duration_ms, synthesis_cost_usd, error)
            .await
    }

    pub async fn log(&self, message: &str) -> Result<(), CegirError> {
        self.workflow_logger.lock().await.log_event(message).await
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn lineage(&self) -> &str {
        &self.lineage
    }
}
