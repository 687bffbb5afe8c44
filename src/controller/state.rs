use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::errors::RetryConfig;
use crate::models::{Plan, RefinementMove, Trace, Verdict};

/// Position of the controller in the BUILD -> EXECUTE -> CLASSIFY -> REFINE cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LoopState {
    Build,
    Execute,
    Classify,
    Refine,
    Done,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Execute => write!(f, "execute"),
            Self::Classify => write!(f, "classify"),
            Self::Refine => write!(f, "refine"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Progress notifications for the CLI display. Sending never blocks the loop.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    IterationStarted { lineage: String, iteration: u32, plan_version: u32 },
    StateChanged { lineage: String, state: LoopState },
    Classified { lineage: String, iteration: u32, verdict: Verdict },
    PlanCommitted { lineage: String, version: u32, applied: RefinementMove },
    Finished { lineage: String, verdict: Verdict, iterations: u32, duration_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub lineage: String,
    /// Maximum number of iterations; must be at least 1.
    pub budget: u32,
    pub retry: RetryConfig,
}

impl ControllerConfig {
    pub fn new(lineage: impl Into<String>, budget: u32) -> Self {
        Self { lineage: lineage.into(), budget, retry: RetryConfig::default() }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of a finished lineage.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub lineage: String,
    pub verdict: Verdict,
    /// Last committed plan; the reproducing plan when GREEN.
    pub plan: Arc<Plan>,
    pub trace: Trace,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub synthesis_cost_usd: Option<f64>,
}

impl LoopOutcome {
    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    pub fn iterations(&self) -> u32 {
        self.trace.len() as u32
    }
}
