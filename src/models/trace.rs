use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::build::BuildFailure;
use super::execution::{Counterexample, ExecutionOutcome};
use super::location::SourceLocation;
use super::verdict::{ResourceCause, Verdict};

/// Kind of change the proposer applied to produce the next plan version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementMove {
    AddStubs,
    DropStubs,
    WidenBuildTimeout,
    WidenExecutionBudget,
    TightenStub,
    RelocateInjection,
    WidenStubRange,
    RelaxStub,
    WidenInputRange,
    PromoteArgument,
    Synthesized,
}

impl RefinementMove {
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Synthesized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddStubs => "add_stubs",
            Self::DropStubs => "drop_stubs",
            Self::WidenBuildTimeout => "widen_build_timeout",
            Self::WidenExecutionBudget => "widen_execution_budget",
            Self::TightenStub => "tighten_stub",
            Self::RelocateInjection => "relocate_injection",
            Self::WidenStubRange => "widen_stub_range",
            Self::RelaxStub => "relax_stub",
            Self::WidenInputRange => "widen_input_range",
            Self::PromoteArgument => "promote_argument",
            Self::Synthesized => "synthesized",
        }
    }
}

impl std::fmt::Display for RefinementMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub attempt: u32,
    /// The move that produced the candidate.
    pub source: RefinementMove,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementSummary {
    pub applied: RefinementMove,
    pub description: String,
    pub next_version: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub build_ms: u64,
    pub execute_ms: u64,
    pub refine_ms: u64,
}

/// One loop iteration as recorded for audit and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub iteration: u32,
    pub plan_version: u32,
    pub verdict: Verdict,
    #[serde(default)]
    pub cause: Option<ResourceCause>,
    #[serde(default)]
    pub build_failure: Option<BuildFailure>,
    pub executed: bool,
    #[serde(default)]
    pub outcome: Option<ExecutionOutcome>,
    #[serde(default)]
    pub paths_explored: u64,
    #[serde(default)]
    pub hit_location: Option<SourceLocation>,
    #[serde(default)]
    pub counterexample: Option<Counterexample>,
    pub timings: Timings,
    #[serde(default)]
    pub refinement: Option<RefinementSummary>,
    #[serde(default)]
    pub rejected: Vec<RejectedCandidate>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Ordered iteration records of one lineage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub records: Vec<TraceRecord>,
}

impl Trace {
    pub fn push(&mut self, record: TraceRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&TraceRecord> {
        self.records.last()
    }

    /// Local (non-synthesized) moves already applied in response to `verdict`.
    pub fn local_moves_for(&self, verdict: Verdict) -> usize {
        self.records.iter()
            .filter(|r| r.verdict == verdict)
            .filter_map(|r| r.refinement.as_ref())
            .filter(|s| s.applied.is_local())
            .count()
    }

    /// Whether `applied` was already used for `verdict` somewhere in the lineage.
    pub fn has_applied(&self, verdict: Verdict, applied: RefinementMove) -> bool {
        self.records.iter()
            .filter(|r| r.verdict == verdict)
            .filter_map(|r| r.refinement.as_ref())
            .any(|s| s.applied == applied)
    }
}
