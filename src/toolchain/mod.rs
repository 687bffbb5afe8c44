//! Typed adapters around the compiler toolchain and the symbolic engine.

pub mod build;
pub mod diagnostics;
pub mod klee_log;
pub mod process;
pub mod runner;

use std::path::Path;
use async_trait::async_trait;
use crate::errors::CegirError;
use crate::harness::{HarnessBundle, HarnessLayout};
use crate::models::{BuildDescription, BuildResult, ExecutionBudget, ExecutionReport, Plan, SymbolicInput};

pub use build::ClangBuildExecutor;
pub use process::{ProcessBackend, ProcessOutput};
pub use runner::KleeRunner;

pub struct BuildRequest<'a> {
    pub description: &'a BuildDescription,
    pub plan: &'a Plan,
    pub bundle: &'a HarnessBundle,
    pub layout: &'a HarnessLayout,
}

pub struct ExecutionRequest<'a> {
    pub artifact: &'a Path,
    pub inputs: &'a [SymbolicInput],
    pub budget: ExecutionBudget,
    pub work_dir: &'a Path,
}

/// `Ok` with a failed [`BuildResult`] is a build the plan can be refined
/// against; `Err` is an infrastructure problem.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn build(&self, request: &BuildRequest<'_>) -> Result<BuildResult, CegirError>;
}

/// Timeouts and resource exhaustion are reported in the returned report;
/// `Err` means the engine itself could not be run.
#[async_trait]
pub trait SymbolicRunner: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionReport, CegirError>;
}
