use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::audit::AuditSession;
use crate::config::{CegirConfig, ToolchainBackend};
use crate::container::ContainerManager;
use crate::errors::CegirError;
use crate::harness::{HarnessLayout, SourceIndex};
use crate::llm::provider_from_config;
use crate::models::{BuildDescription, Plan, VulnerabilitySpec};
use crate::prompts::PromptLoader;
use crate::refine::{
    LlmSynthesizer, ProposerSettings, RefinementProposer, SynthesisCollaborator, UnavailableSynthesizer,
};
use crate::store::PlanStore;
use crate::toolchain::{
    BuildExecutor, ClangBuildExecutor, KleeRunner, ProcessBackend, SymbolicRunner,
};
use crate::reporting::write_report;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use super::orchestrator::{CegirController, LoopDependencies};
use super::state::{ControllerConfig, LoopEvent, LoopOutcome};
use tracing::{debug, info, warn};

/// Adapters shared by every lineage of one invocation.
#[derive(Clone)]
pub struct LoopServices {
    pub builder: Arc<dyn BuildExecutor>,
    pub runner: Arc<dyn SymbolicRunner>,
    pub synthesizer: Arc<dyn SynthesisCollaborator>,
    pub store: Arc<PlanStore>,
    pub output_dir: PathBuf,
}

impl LoopServices {
    /// Wire the configured toolchain backend, symbolic engine and synthesis
    /// collaborator. `mounts` are host directories the container must see.
    pub async fn from_config(
        config: &CegirConfig,
        prompts_dir: Option<PathBuf>,
        mounts: Vec<PathBuf>,
    ) -> Result<Self, CegirError> {
        let output_dir = absolute(&config.output_dir())?;
        let toolchain = config.toolchain();

        let backend = match toolchain.backend() {
            ToolchainBackend::Local => ProcessBackend::Local,
            ToolchainBackend::Container => {
                let mut mounts = mounts;
                mounts.push(output_dir.clone());
                let manager = ContainerManager::new(&toolchain, mounts).await?;
                manager.ensure_running().await?;
                ProcessBackend::Container(Arc::new(manager))
            }
        };
        info!(backend = backend.name(), output = %output_dir.display(), "Toolchain backend ready");

        let builder: Arc<dyn BuildExecutor> =
            Arc::new(
            ClangBuildExecutor::new(backend.clone(), toolchain.llvm_link()).with_symbol_lister(toolchain.llvm_nm()),
        );
        let runner: Arc<dyn SymbolicRunner> = Arc::new(KleeRunner::new(backend, &toolchain));

        let synthesizer: Arc<dyn SynthesisCollaborator> = match &config.llm {
            Some(llm) => {
                let provider = provider_from_config(llm)?;
                info!(provider = provider.provider_name(), model = provider.model_name(), "Synthesis collaborator configured");
                let prompts = match prompts_dir {
                    Some(dir) => PromptLoader::new(dir),
                    None => PromptLoader::builtin(),
                };
                Arc::new(
                    LlmSynthesizer::new(Arc::from(provider), Arc::new(prompts))
                        .with_limits(llm.max_tokens, llm.temperature),
                )
            }
            None => {
                info!("No llm section configured; refinement limited to local moves");
                Arc::new(UnavailableSynthesizer)
            }
        };

        let store = Arc::new(PlanStore::open(&output_dir).await?);
        Ok(Self { builder, runner, synthesizer, store, output_dir })
    }
}

/// One spec to verify, with optional overrides.
pub struct LineageRequest {
    pub spec: VulnerabilitySpec,
    pub description: BuildDescription,
    pub seed: Option<Plan>,
    pub lineage: Option<String>,
    pub iterations: Option<u32>,
}

impl LineageRequest {
    /// Load spec (JSON), build description (YAML/JSON) and optional seed plan.
    pub async fn load(spec: &Path, build: &Path, seed: Option<&Path>) -> Result<Self, CegirError> {
        let spec = VulnerabilitySpec::load(spec).await?;
        let description = BuildDescription::load(build).await?;
        let seed = match seed {
            Some(path) => Some(Plan::load(path).await?),
            None => None,
        };
        Ok(Self { spec, description, seed, lineage: None, iterations: None })
    }

    /// Build the controller and seed plan for this lineage. The audit trail
    /// and plan history land under `<output>/<lineage>/`.
    pub async fn prepare(
        self,
        config: &CegirConfig,
        services: &LoopServices,
    ) -> Result<(CegirController, Plan), CegirError> {
        self.spec.validate()?;
        self.description.validate()?;

        let lineage = self.lineage.unwrap_or_else(|| lineage_id(&self.spec.id));
        let source_root = absolute(&self.description.source_root)?;
        let scan_root = source_root.clone();
        let index = tokio::task::spawn_blocking(move || SourceIndex::scan(&scan_root))
            .await
            .map_err(|e| CegirError::Internal(format!("Source scan task failed: {}", e)))??;
        debug!(lineage = %lineage, files = index.files().len(), "Source index built");

        let layout = HarnessLayout::new(&source_root, services.output_dir.join(&lineage).join("work"));
        let seed = self.seed.unwrap_or_else(|| Plan::seed(&self.spec, config.initial_budget()));
        let index = Arc::new(index);

        let settings = ProposerSettings {
            local_move_limit: config.local_move_limit(),
            max_patch_retries: config.max_patch_retries(),
            ceiling: config.budget_ceiling(),
            retry: config.retry_config(),
        };
        let proposer = RefinementProposer::new(
            services.synthesizer.clone(),
            index.clone(),
            layout.clone(),
            settings,
        );

        let audit = AuditSession::initialize(&services.output_dir, &lineage).await?;
        let controller_config = ControllerConfig::new(
            lineage,
            self.iterations.unwrap_or_else(|| config.iterations()),
        )
        .with_retry(config.retry_config());

        let mut description = self.description;
        description.source_root = source_root;
        let deps = LoopDependencies {
            description: Arc::new(description),
            layout,
            index,
            builder: services.builder.clone(),
            runner: services.runner.clone(),
            proposer: Arc::new(proposer),
            store: services.store.clone(),
        };
        let controller = CegirController::new(controller_config, Arc::new(self.spec), deps)
            .with_audit(Arc::new(audit));
        Ok((controller, seed))
    }
}

/// Prepare and run one lineage, then write its markdown report.
pub async fn run_lineage(
    request: LineageRequest,
    config: &CegirConfig,
    services: &LoopServices,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<LoopEvent>>,
) -> Result<(LoopOutcome, Option<PathBuf>), CegirError> {
    let (controller, seed) = request.prepare(config, services).await?;
    let mut controller = controller.with_cancel_token(cancel);
    if let Some(tx) = events {
        controller = controller.with_event_channel(tx);
    }
    let outcome = controller.run(seed).await?;

    let report = match controller.audit_dir() {
        Some(dir) => match write_report(dir, &outcome, controller.spec()).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(lineage = %outcome.lineage, error = %e, "Failed to write report");
                None
            }
        },
        None => None,
    };
    Ok((outcome, report))
}

/// `<spec id>-<8 hex>`, with characters outside the lineage id set replaced.
pub fn lineage_id(spec_id: &str) -> String {
    let mut base: String = spec_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .take(96)
        .collect();
    if base.trim_matches('.').is_empty() {
        base = "lineage".to_string();
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", base, &suffix[..8])
}

fn absolute(path: &Path) -> Result<PathBuf, CegirError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::validate_lineage_id;

    #[test]
    fn test_lineage_id_sanitizes_spec_id() {
        let id = lineage_id("CVE-2024/1234 heap");
        assert!(id.starts_with("CVE-2024_1234_heap-"));
        assert_eq!(id.len(), "CVE-2024_1234_heap-".len() + 8);
        assert!(validate_lineage_id(&id).is_ok());
        assert_ne!(lineage_id("x"), lineage_id("x"));
        assert!(lineage_id("..").starts_with("lineage-"));
    }
}
