use std::path::{Path, PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use crate::errors::CegirError;
use crate::models::Verdict;
use super::utils::atomic_write;

pub const FINAL_FILE: &str = "final.json";

/// Lineage-level result written to `final.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LineageSummary {
    pub lineage: String,
    pub spec_id: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub verdict: Option<Verdict>,
    pub iterations: u32,
    pub budget: u32,
    pub final_plan_version: u32,
    pub duration_ms: Option<u64>,
    pub synthesis_cost_usd: Option<f64>,
    pub error: Option<String>,
}

pub struct MetricsTracker {
    path: PathBuf,
    data: LineageSummary,
}

impl MetricsTracker {
    pub fn new(base_dir: &Path, lineage: &str) -> Self {
        Self {
            path: base_dir.join(FINAL_FILE),
            data: LineageSummary {
                lineage: lineage.to_string(),
                started_at: Utc::now().to_rfc3339(),
                ..Default::default()
            },
        }
    }

    pub fn start(&mut self, spec_id: &str, budget: u32) {
        self.data.spec_id = spec_id.to_string();
        self.data.budget = budget;
    }

    pub fn record_iteration(&mut self, iteration: u32, plan_version: u32) {
        self.data.iterations = iteration;
        self.data.final_plan_version = plan_version;
    }

    pub async fn finish(
        &mut self,
        verdict: Verdict,
        plan_version: u32,
        duration_ms: u64,
        synthesis_cost_usd: Option<f64>,
        error: Option<String>,
    ) -> Result<(), CegirError> {
        self.data.completed_at = Some(Utc::now().to_rfc3339());
        self.data.verdict = Some(verdict);
        self.data.final_plan_version = plan_version;
        self.data.duration_ms = Some(duration_ms);
        self.data.synthesis_cost_usd = synthesis_cost_usd;
        self.data.error = error;
        self.save().await
    }

    pub async fn save(&self) -> Result<(), CegirError> {
        let json = serde_json::to_string_pretty(&self.data)?;
        atomic_write(&self.path, &json).await
    }

    pub fn summary(&self) -> &LineageSummary {
        &self.data
    }
}

pub async fn read_summary(base_dir: &Path) -> Result<LineageSummary, CegirError> {
    let content = tokio::fs::read_to_string(base_dir.join(FINAL_FILE)).await?;
    Ok(serde_json::from_str(&content)?)
}
