use serde::{Deserialize, Serialize};
use super::location::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    NoIssue,
    TargetAssertionReached,
    OtherCrash,
    Timeout,
    ResourceExhaustion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    Assertion,
    Crash,
}

/// Concrete value of one symbolic object in a counterexample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputValue {
    pub name: String,
    pub hex: String,
    #[serde(default)]
    pub int: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterexample {
    pub values: Vec<InputValue>,
}

impl Counterexample {
    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An assertion or crash the engine reached on some explored path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteHit {
    pub kind: HitKind,
    pub location: Option<SourceLocation>,
    #[serde(default)]
    pub function: Option<String>,
    pub message: String,
    /// Raised by the injected target check rather than by the program.
    pub is_target: bool,
    #[serde(default)]
    pub counterexample: Counterexample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub paths_explored: u64,
    pub instructions: u64,
    pub hits: Vec<SiteHit>,
    pub duration_ms: u64,
    /// False when the runner was not invoked for this iteration.
    pub executed: bool,
    #[serde(default)]
    pub log_excerpt: String,
}

impl ExecutionReport {
    /// Placeholder report for iterations whose build failed.
    pub fn skipped() -> Self {
        Self {
            outcome: ExecutionOutcome::NoIssue,
            paths_explored: 0,
            instructions: 0,
            hits: Vec::new(),
            duration_ms: 0,
            executed: false,
            log_excerpt: String::new(),
        }
    }

    pub fn first_non_target_hit(&self) -> Option<&SiteHit> {
        self.hits.iter().find(|h| !h.is_target)
    }
}

/// Summarize per-path hits and engine halt reasons into one outcome.
/// Any target hit wins, then any other hit, then halt reasons.
pub fn summarize_outcome(hits: &[SiteHit], timed_out: bool, resource_exhausted: bool) -> ExecutionOutcome {
    if hits.iter().any(|h| h.is_target) {
        ExecutionOutcome::TargetAssertionReached
    } else if !hits.is_empty() {
        ExecutionOutcome::OtherCrash
    } else if timed_out {
        ExecutionOutcome::Timeout
    } else if resource_exhausted {
        ExecutionOutcome::ResourceExhaustion
    } else {
        ExecutionOutcome::NoIssue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(is_target: bool) -> SiteHit {
        SiteHit {
            kind: if is_target { HitKind::Assertion } else { HitKind::Crash },
            location: Some(SourceLocation::new("a.c", 3)),
            function: None,
            message: "x".into(),
            is_target,
            counterexample: Counterexample::default(),
        }
    }

    #[test]
    fn test_summarize_prefers_target() {
        assert_eq!(summarize_outcome(&[hit(false), hit(true)], true, false), ExecutionOutcome::TargetAssertionReached);
        assert_eq!(summarize_outcome(&[hit(false)], true, false), ExecutionOutcome::OtherCrash);
        assert_eq!(summarize_outcome(&[], true, true), ExecutionOutcome::Timeout);
        assert_eq!(summarize_outcome(&[], false, true), ExecutionOutcome::ResourceExhaustion);
        assert_eq!(summarize_outcome(&[], false, false), ExecutionOutcome::NoIssue);
    }

    #[test]
    fn test_skipped_report_is_not_executed() {
        let report = ExecutionReport::skipped();
        assert!(!report.executed);
        assert!(report.hits.is_empty());
    }
}
