use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use crate::config::ToolchainConfig;
use crate::errors::CegirError;
use crate::models::{summarize_outcome, Counterexample, ExecutionReport, SiteHit};
use crate::utils::truncation::{tail, truncate_error};
use super::klee_log::{hit_from_err, parse_err_file, parse_ktest_dump, parse_run_summary, split_err_name};
use super::process::ProcessBackend;
use super::{ExecutionRequest, SymbolicRunner};
use tracing::{debug, warn};

const OUTPUT_DIR: &str = "klee-out";
const LOG_EXCERPT_BYTES: usize = 4_000;

/// KLEE-style engine adapter.
pub struct KleeRunner {
    backend: ProcessBackend,
    klee: String,
    ktest_tool: String,
    extra_args: Vec<String>,
    grace: Duration,
}

impl KleeRunner {
    pub fn new(backend: ProcessBackend, config: &ToolchainConfig) -> Self {
        Self {
            backend,
            klee: config.klee(),
            ktest_tool: config.ktest_tool(),
            extra_args: config.klee_args.clone().unwrap_or_default(),
            grace: config.grace(),
        }
    }

    pub fn engine_args(&self, request: &ExecutionRequest<'_>, output_dir: &Path) -> Vec<String> {
        let budget = request.budget;
        let mut args = vec![
            format!("--output-dir={}", output_dir.display()),
            format!("--max-time={}s", budget.time_secs),
            format!("--max-memory={}", budget.max_memory_mb),
            format!("--max-instructions={}", budget.max_instructions),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(request.artifact.to_string_lossy().to_string());
        args
    }

    async fn collect_hits(&self, output_dir: &Path, cwd: &Path) -> Result<Vec<SiteHit>, CegirError> {
        let pattern = output_dir.join("test*.err").to_string_lossy().to_string();
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| CegirError::Toolchain(format!("Bad error-file pattern: {}", e)))?
            .filter_map(Result::ok)
            .collect();
        paths.sort();

        let mut hits = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else { continue };
            let Some((test, suffix)) = split_err_name(&name) else { continue };
            let content = tokio::fs::read_to_string(&path).await?;
            let counterexample = self.decode_test(&output_dir.join(format!("{}.ktest", test)), cwd).await;
            hits.push(hit_from_err(parse_err_file(&content), suffix, counterexample));
        }
        Ok(hits)
    }

    /// Decode a test case; a missing or undecodable test leaves the hit
    /// without concrete values.
    async fn decode_test(&self, ktest: &Path, cwd: &Path) -> Counterexample {
        if !tokio::fs::try_exists(ktest).await.unwrap_or(false) {
            return Counterexample::default();
        }
        let args = vec![ktest.to_string_lossy().to_string()];
        match self.backend.run(&self.ktest_tool, &args, cwd, Duration::from_secs(30)).await {
            Ok(out) if out.success() => parse_ktest_dump(&out.stdout),
            Ok(out) => {
                warn!(ktest = %ktest.display(), code = ?out.code, "Test case dump failed");
                Counterexample::default()
            }
            Err(e) => {
                warn!(ktest = %ktest.display(), error = %e, "Test case dump failed");
                Counterexample::default()
            }
        }
    }
}

#[async_trait]
impl SymbolicRunner for KleeRunner {
    async fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionReport, CegirError> {
        let started = Instant::now();
        let output_dir = request.work_dir.join(OUTPUT_DIR);
        // The engine refuses to reuse an output directory.
        if tokio::fs::try_exists(&output_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&output_dir).await?;
        }

        let args = self.engine_args(request, &output_dir);
        let wall_clock = Duration::from_secs(request.budget.time_secs) + self.grace;
        let out = self.backend.run(&self.klee, &args, request.work_dir, wall_clock).await?;

        let summary = parse_run_summary(&out.stderr);
        let hits = self.collect_hits(&output_dir, request.work_dir).await?;

        // Killed from outside: whatever was found so far still counts.
        let timed_out = out.timed_out || summary.halted_by_timer;
        if !out.timed_out && !summary.finished && hits.is_empty() {
            return Err(CegirError::Toolchain(format!(
                "{} exited with {:?} without a run summary: {}",
                self.klee, out.code, truncate_error(tail(&out.stderr, 2_000))
            )));
        }

        let outcome = summarize_outcome(&hits, timed_out, summary.resource_exhausted);
        debug!(
            outcome = ?outcome,
            paths = summary.paths_explored,
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Symbolic execution finished"
        );

        Ok(ExecutionReport {
            outcome,
            paths_explored: summary.paths_explored,
            instructions: summary.instructions,
            hits,
            duration_ms: started.elapsed().as_millis() as u64,
            executed: true,
            log_excerpt: tail(&out.stderr, LOG_EXCERPT_BYTES).to_string(),
        })
    }
}
