use serde::{Deserialize, Serialize};

/// Outcome of one iteration, or of the whole lineage once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// The injected assertion fired exactly at the claimed site.
    Green,
    BuildFail,
    /// A different crash or assertion fired.
    WrongSite,
    /// Execution finished (or was cut off) without reaching the site.
    NoReproduction,
    BudgetExhausted,
    /// Toolchain, engine or collaborator kept failing after retries.
    InfraError,
    Cancelled,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::BuildFail => "BUILD_FAIL",
            Self::WrongSite => "WRONG_SITE",
            Self::NoReproduction => "NO_REPRODUCTION",
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::InfraError => "INFRA_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Green | Self::BudgetExhausted | Self::InfraError | Self::Cancelled)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Green => 0,
            Self::BudgetExhausted => 3,
            Self::InfraError => 4,
            Self::Cancelled => 130,
            // Never final; reaching here means the loop stopped early.
            Self::BuildFail | Self::WrongSite | Self::NoReproduction => 1,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a NO_REPRODUCTION verdict was reached when the engine was cut off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCause {
    Timeout,
    ResourceExhaustion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub verdict: Verdict,
    #[serde(default)]
    pub cause: Option<ResourceCause>,
}

impl Classification {
    pub fn plain(verdict: Verdict) -> Self {
        Self { verdict, cause: None }
    }
}
