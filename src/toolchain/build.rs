use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use crate::errors::CegirError;
use crate::harness::{HarnessBundle, HarnessLayout};
use crate::models::{BuildDescription, BuildFailure, BuildResult, BuildSystem};
use crate::utils::truncation::truncate_output;
use super::diagnostics::{classify_build_failure, unresolved_symbols};
use super::process::{shell_quote, ProcessBackend, ProcessOutput};
use super::{BuildExecutor, BuildRequest};
use tracing::{debug, info, warn};

pub const ARTIFACT_FILE: &str = "harness.bc";

const BITCODE_FLAGS: &[&str] = &[
    "-emit-llvm", "-c", "-g", "-O0",
    "-Xclang", "-disable-O0-optnone",
    "-Werror=implicit-function-declaration",
];

/// Compiles harness, stubs and target sources to LLVM bitcode and links
/// them into a single artifact for the engine.
pub struct ClangBuildExecutor {
    backend: ProcessBackend,
    llvm_link: String,
    /// Lists the linked artifact's undefined symbols.
    llvm_nm: String,
    /// Configure step output (extra include dirs), run once per executor.
    prepared: OnceCell<Vec<PathBuf>>,
}

impl ClangBuildExecutor {
    pub fn new(backend: ProcessBackend, llvm_link: impl Into<String>) -> Self {
        Self {
            backend,
            llvm_link: llvm_link.into(),
            llvm_nm: "llvm-nm".to_string(),
            prepared: OnceCell::new(),
        }
    }

    pub fn with_symbol_lister(mut self, llvm_nm: impl Into<String>) -> Self {
        self.llvm_nm = llvm_nm.into();
        self
    }

    /// Project configure step so generated headers (config.h and friends)
    /// exist before any harness is compiled. Runs under the same per-build
    /// timeout as the compile steps.
    async fn prepare(
        &self,
        description: &BuildDescription,
        layout: &HarnessLayout,
        timeout: Duration,
    ) -> Result<Vec<PathBuf>, CegirError> {
        let root = &description.source_root;
        match description.system.detect(root) {
            BuildSystem::Cmake => {
                let build_dir = layout.work_root.join("cmake-build");
                tokio::fs::create_dir_all(&build_dir).await?;
                let args = vec![
                    "-S".to_string(), root.to_string_lossy().to_string(),
                    "-B".to_string(), build_dir.to_string_lossy().to_string(),
                    format!("-DCMAKE_C_COMPILER={}", description.compiler),
                    "-DCMAKE_BUILD_TYPE=Debug".to_string(),
                ];
                info!(root = %root.display(), "Configuring CMake project");
                let out = self.backend.run("cmake", &args, root, timeout).await?;
                ensure_configured(&out, "cmake")?;
                Ok(vec![build_dir])
            }
            BuildSystem::Make => {
                if root.join("configure").exists() && !root.join("Makefile").exists() {
                    info!(root = %root.display(), "Running configure");
                    let command = format!("CC={} ./configure", shell_quote(&description.compiler));
                    let out = self.backend.run_shell(&command, root, timeout).await?;
                    ensure_configured(&out, "configure")?;
                }
                Ok(Vec::new())
            }
            BuildSystem::Custom | BuildSystem::Auto => Ok(Vec::new()),
        }
    }

    fn compile_args(
        &self,
        description: &BuildDescription,
        bundle: &HarnessBundle,
        extra_includes: &[PathBuf],
        input: &Path,
        output: &Path,
    ) -> Vec<String> {
        let mut args: Vec<String> = BITCODE_FLAGS.iter().map(|s| s.to_string()).collect();
        args.extend(description.cflags.iter().cloned());
        args.extend(description.defines.iter().map(|d| format!("-D{}", d)));
        for dir in &bundle.quote_dirs {
            args.push("-iquote".to_string());
            args.push(dir.to_string_lossy().to_string());
        }
        args.extend(include_flags(description, extra_includes));
        args.push(input.to_string_lossy().to_string());
        args.push("-o".to_string());
        args.push(output.to_string_lossy().to_string());
        args
    }

    async fn default_build(
        &self,
        request: &BuildRequest<'_>,
        extra_includes: &[PathBuf],
        timeout: Duration,
    ) -> Result<Result<PathBuf, ProcessOutput>, CegirError> {
        let description = request.description;
        let bundle = request.bundle;
        let dir = request.layout.version_dir(bundle.version);
        let bc_dir = dir.join("bc");
        tokio::fs::create_dir_all(&bc_dir).await?;

        let mut units: Vec<PathBuf> = vec![bundle.harness_path.clone()];
        if let Some(stubs) = &bundle.stubs_path {
            units.push(stubs.clone());
        }
        for rel in linked_sources(description, bundle) {
            units.push(bundle.source_path(request.layout, &rel));
        }

        let deadline = Instant::now() + timeout;
        let mut bitcode = Vec::with_capacity(units.len());
        for (i, unit) in units.iter().enumerate() {
            let stem = unit.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            let out = bc_dir.join(format!("{:02}-{}.bc", i, stem));
            let args = self.compile_args(description, bundle, extra_includes, unit, &out);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = self.backend.run(&description.compiler, &args, &dir, remaining).await?;
            if !result.success() {
                return Ok(Err(result));
            }
            bitcode.push(out);
        }

        let artifact = dir.join(ARTIFACT_FILE);
        let mut args: Vec<String> = bitcode.iter().map(|p| p.to_string_lossy().to_string()).collect();
        args.push("-o".to_string());
        args.push(artifact.to_string_lossy().to_string());
        let remaining = deadline.saturating_duration_since(Instant::now());
        let linked = self.backend.run(&self.llvm_link, &args, &dir, remaining).await?;
        if !linked.success() {
            return Ok(Err(linked));
        }
        Ok(Ok(artifact))
    }

    async fn custom_build(
        &self,
        request: &BuildRequest<'_>,
        extra_includes: &[PathBuf],
        timeout: Duration,
    ) -> Result<Result<PathBuf, ProcessOutput>, CegirError> {
        let description = request.description;
        let bundle = request.bundle;
        let dir = request.layout.version_dir(bundle.version);
        let artifact = dir.join(ARTIFACT_FILE);

        let mut sources: Vec<String> = Vec::new();
        if let Some(stubs) = &bundle.stubs_path {
            sources.push(shell_quote(&stubs.to_string_lossy()));
        }
        for rel in linked_sources(description, bundle) {
            sources.push(shell_quote(&bundle.source_path(request.layout, &rel).to_string_lossy()));
        }
        let mut cflags: Vec<String> = description.cflags.iter().map(|f| shell_quote(f)).collect();
        cflags.extend(description.defines.iter().map(|d| shell_quote(&format!("-D{}", d))));
        let mut includes: Vec<String> = Vec::new();
        for dir in &bundle.quote_dirs {
            includes.push(format!("-iquote {}", shell_quote(&dir.to_string_lossy())));
        }
        includes.extend(include_flags(description, extra_includes).iter().map(|f| shell_quote(f)));

        let deadline = Instant::now() + timeout;
        let mut last = ProcessOutput::default();
        for template in &description.commands {
            let command = template
                .replace("{harness}", &shell_quote(&bundle.harness_path.to_string_lossy()))
                .replace("{artifact}", &shell_quote(&artifact.to_string_lossy()))
                .replace("{sources}", &sources.join(" "))
                .replace("{cflags}", &cflags.join(" "))
                .replace("{includes}", &includes.join(" "))
                .replace("{workdir}", &shell_quote(&dir.to_string_lossy()));
            debug!(command = %command, "Custom build step");
            let remaining = deadline.saturating_duration_since(Instant::now());
            last = self.backend.run_shell(&command, &dir, remaining).await?;
            if !last.success() {
                return Ok(Err(last));
            }
        }

        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            last.code = Some(1);
            last.stderr.push_str(&format!("\nerror: custom build did not produce {}", artifact.display()));
            return Ok(Err(last));
        }
        Ok(Ok(artifact))
    }

    /// Functions the artifact calls that no linked unit defines. An
    /// unavailable or failing lister skips the check.
    async fn undefined_functions(&self, artifact: &Path, cwd: &Path, timeout: Duration) -> Vec<String> {
        let args = vec!["--undefined-only".to_string(), artifact.to_string_lossy().to_string()];
        match self.backend.run(&self.llvm_nm, &args, cwd, timeout).await {
            Ok(out) if out.success() => unresolved_symbols(&out.stdout),
            Ok(out) => {
                warn!(tool = %self.llvm_nm, code = ?out.code, "Symbol listing failed; skipping undefined-symbol check");
                Vec::new()
            }
            Err(e) => {
                warn!(tool = %self.llvm_nm, error = %e, "Symbol lister unavailable; skipping undefined-symbol check");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl BuildExecutor for ClangBuildExecutor {
    async fn build(&self, request: &BuildRequest<'_>) -> Result<BuildResult, CegirError> {
        let started = Instant::now();
        let timeout = Duration::from_secs(request.plan.budget.build_timeout_secs);
        let extra_includes = self.prepared
            .get_or_try_init(|| self.prepare(request.description, request.layout, timeout))
            .await?
            .clone();

        request.bundle.write(request.layout).await?;

        let outcome = if request.description.system == BuildSystem::Custom {
            self.custom_build(request, &extra_includes, timeout).await?
        } else {
            self.default_build(request, &extra_includes, timeout).await?
        };
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(artifact) => {
                let cwd = request.layout.version_dir(request.bundle.version);
                let remaining = timeout.saturating_sub(started.elapsed());
                let symbols = self.undefined_functions(&artifact, &cwd, remaining).await;
                let elapsed = started.elapsed().as_millis() as u64;
                if !symbols.is_empty() {
                    let diagnostic = format!(
                        "{} references undefined functions: {}", ARTIFACT_FILE, symbols.join(", ")
                    );
                    debug!(symbols = symbols.len(), elapsed_ms = elapsed, "Build left undefined symbols");
                    return Ok(BuildResult::failed(BuildFailure::MissingSymbol { symbols }, diagnostic, elapsed));
                }
                debug!(artifact = %artifact.display(), elapsed_ms = elapsed, "Build succeeded");
                Ok(BuildResult::succeeded(artifact, String::new(), elapsed))
            }
            Err(output) => {
                let text = output.combined();
                let failure = classify_build_failure(&text, output.timed_out);
                debug!(reason = failure.as_str(), elapsed_ms = elapsed, "Build failed");
                Ok(BuildResult::failed(failure, truncate_output(&text), elapsed))
            }
        }
    }
}

fn include_flags(description: &BuildDescription, extra: &[PathBuf]) -> Vec<String> {
    let root = &description.source_root;
    let mut flags = vec![format!("-I{}", root.display())];
    for dir in &description.include_dirs {
        let dir = if dir.is_absolute() { dir.clone() } else { root.join(dir) };
        flags.push(format!("-I{}", dir.display()));
    }
    for dir in extra {
        flags.push(format!("-I{}", dir.display()));
    }
    flags
}

/// Sources linked next to the harness: the described sources plus any
/// instrumented translation unit they omit. The target unit is included by
/// the harness itself.
fn linked_sources(description: &BuildDescription, bundle: &HarnessBundle) -> Vec<String> {
    let mut rels: Vec<String> = description.sources.iter()
        .map(|s| s.to_string_lossy().replace('\\', "/"))
        .filter(|rel| *rel != bundle.target_unit)
        .collect();
    for rel in bundle.instrumented.keys() {
        if *rel != bundle.target_unit && rel.ends_with(".c") && !rels.contains(rel) {
            rels.push(rel.clone());
        }
    }
    rels
}

/// Configure failures and overruns are input errors and are not retried.
fn ensure_configured(out: &ProcessOutput, step: &str) -> Result<(), CegirError> {
    if out.timed_out {
        return Err(CegirError::Input(format!(
            "{} did not finish within the build timeout", step
        )));
    }
    if out.success() {
        Ok(())
    } else {
        Err(CegirError::Input(format!(
            "{} failed (exit {:?}): {}",
            step,
            out.code,
            crate::utils::truncation::truncate_error(&out.combined())
        )))
    }
}
