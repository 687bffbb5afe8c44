use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use crate::errors::CegirError;
use crate::llm::{Completion, LLMProvider};
use crate::llm::types::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::models::{Plan, Verdict, VulnerabilitySpec};
use crate::prompts::{PromptLoader, PromptVariables};
use super::patch::PatchRegion;
use tracing::{debug, info};

/// Everything the collaborator is shown for one synthesis attempt.
pub struct SynthesisRequest<'a> {
    pub spec: &'a VulnerabilitySpec,
    pub plan: &'a Plan,
    pub region: PatchRegion,
    pub verdict: Verdict,
    pub diagnostic: String,
    pub source_excerpt: Option<String>,
    /// Reasons earlier candidates in this proposal were rejected.
    pub rejections: &'a [String],
}

/// Untrusted text-to-patch service. Its output is parsed and validated
/// before it can reach a plan.
#[async_trait]
pub trait SynthesisCollaborator: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String, CegirError>;

    fn name(&self) -> &str;

    /// Accumulated spend, when the collaborator is metered.
    fn cost_usd(&self) -> Option<f64> {
        None
    }
}

/// Collaborator backed by an LLM provider and the synthesis prompt templates.
pub struct LlmSynthesizer {
    llm: Arc<dyn LLMProvider>,
    prompts: Arc<PromptLoader>,
    max_tokens: u32,
    temperature: f32,
    cost_micro_usd: AtomicU64,
    calls: AtomicU64,
}

impl LlmSynthesizer {
    pub fn new(llm: Arc<dyn LLMProvider>, prompts: Arc<PromptLoader>) -> Self {
        Self {
            llm,
            prompts,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            cost_micro_usd: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens.unwrap_or(self.max_tokens);
        self.temperature = temperature.unwrap_or(self.temperature);
        self
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.cost_micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn build_prompt(&self, request: &SynthesisRequest<'_>) -> Result<(String, String), CegirError> {
        let vars = PromptVariables {
            spec_id: request.spec.id.clone(),
            bug_class: request.spec.bug_class.to_string(),
            bug_description: request.spec.bug_class.description().to_string(),
            target_site: request.spec.site().to_string(),
            function: request.spec.function.clone(),
            region: request.region.to_string(),
            verdict: request.verdict.to_string(),
            fact_pack: Some(request.spec.fact_pack_text()),
            source_excerpt: request.source_excerpt.clone(),
            plan_region: Some(request.region.excerpt(request.plan)),
            failure_diagnostic: Some(request.diagnostic.clone()),
            rejection_reasons: if request.rejections.is_empty() {
                Some("none".to_string())
            } else {
                Some(request.rejections.iter().map(|r| format!("- {}", r)).collect::<Vec<_>>().join("\n"))
            },
        };
        let system = self.prompts.load("synthesis-system")?;
        let template = self.prompts.load("synthesis")?;
        Ok((self.prompts.interpolate(&system, &vars)?, self.prompts.interpolate(&template, &vars)?))
    }
}

#[async_trait]
impl SynthesisCollaborator for LlmSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String, CegirError> {
        let (system, prompt) = self.build_prompt(request)?;
        debug!(region = %request.region, prompt_len = prompt.len(), "Requesting synthesized patch");
        let completion = Completion::new(&prompt)
            .system(&system)
            .limits(self.max_tokens, self.temperature);
        let response = self.llm.complete(&completion).await?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(cost) = response.cost_usd {
            self.cost_micro_usd.fetch_add((cost * 1_000_000.0).round() as u64, Ordering::Relaxed);
        }
        let usage = response.usage.unwrap_or_default();
        info!(
            model = %response.model,
            input_tokens = usage.input,
            output_tokens = usage.output,
            "Synthesis response received"
        );
        Ok(response.content)
    }

    fn name(&self) -> &str {
        self.llm.provider_name()
    }

    fn cost_usd(&self) -> Option<f64> {
        Some(self.total_cost_usd())
    }
}

/// Used when no LLM is configured: local moves still run, synthesis fails.
pub struct UnavailableSynthesizer;

#[async_trait]
impl SynthesisCollaborator for UnavailableSynthesizer {
    async fn synthesize(&self, _request: &SynthesisRequest<'_>) -> Result<String, CegirError> {
        Err(CegirError::Config(
            "Refinement needs the synthesis collaborator but no llm section is configured".into(),
        ))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
