use std::sync::Arc;
use crate::classifier::decisive_hit;
use crate::errors::{with_retry, CegirError, RetryConfig};
use crate::harness::{HarnessLayout, SourceIndex, STUBS_FILE};
use crate::models::{
    is_identifier, BuildFailure, BuildResult, Classification, ExecutionBudget, ExecutionReport,
    InjectionSite, Plan, PlanField, RefinementMove, RejectedCandidate, SourceLocation,
    Stub, StubBehavior, SymbolicInput, Trace, Verdict, VulnerabilitySpec, DRIVER_ENTRY,
};
use crate::models::location::paths_match;
use crate::utils::truncation::truncate_output;
use super::patch::{parse_patch, PatchRegion};
use super::synthesis::{SynthesisCollaborator, SynthesisRequest};
use super::validation::{validate_candidate, ValidationContext};
use tracing::{debug, info, warn};

/// Moves that explore more behavior after a plain NO_REPRODUCTION. These
/// count toward the local move limit; budget widening does not.
const EXPLORATION_MOVES: [RefinementMove; 4] = [
    RefinementMove::WidenStubRange,
    RefinementMove::RelaxStub,
    RefinementMove::WidenInputRange,
    RefinementMove::PromoteArgument,
];

const EXCERPT_RADIUS: u32 = 12;

#[derive(Debug, Clone)]
pub struct ProposerSettings {
    pub local_move_limit: u32,
    pub max_patch_retries: u32,
    pub ceiling: ExecutionBudget,
    pub retry: RetryConfig,
}

impl Default for ProposerSettings {
    fn default() -> Self {
        Self {
            local_move_limit: 3,
            max_patch_retries: 3,
            ceiling: ExecutionBudget {
                time_secs: 1800,
                max_memory_mb: 8192,
                max_instructions: 1_000_000_000,
                build_timeout_secs: 1200,
            },
            retry: RetryConfig::default(),
        }
    }
}

/// One iteration's evidence, as seen by the proposer.
pub struct ProposalRequest<'a> {
    pub plan: &'a Plan,
    pub classification: Classification,
    pub build: &'a BuildResult,
    pub report: &'a ExecutionReport,
    pub spec: &'a VulnerabilitySpec,
    pub iteration: u32,
    pub trace: &'a Trace,
}

/// An accepted candidate, numbered as the next plan version.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub plan: Plan,
    pub applied: RefinementMove,
    pub description: String,
    pub rejected: Vec<RejectedCandidate>,
}

/// No acceptable candidate: the collaborator kept failing or every
/// candidate was rejected.
#[derive(Debug)]
pub struct ProposalFailure {
    pub error: CegirError,
    pub rejected: Vec<RejectedCandidate>,
}

struct Candidate {
    plan: Plan,
    applied: RefinementMove,
    description: String,
}

/// Turns a non-green verdict into the next plan version. Cheap local moves
/// are tried first; content it cannot derive is requested from the
/// synthesis collaborator. Every candidate is validated before acceptance.
pub struct RefinementProposer {
    synthesizer: Arc<dyn SynthesisCollaborator>,
    index: Arc<SourceIndex>,
    layout: HarnessLayout,
    settings: ProposerSettings,
}

impl RefinementProposer {
    pub fn new(
        synthesizer: Arc<dyn SynthesisCollaborator>,
        index: Arc<SourceIndex>,
        layout: HarnessLayout,
        settings: ProposerSettings,
    ) -> Self {
        Self { synthesizer, index, layout, settings }
    }

    pub fn settings(&self) -> &ProposerSettings {
        &self.settings
    }

    pub fn synthesis_cost_usd(&self) -> Option<f64> {
        self.synthesizer.cost_usd()
    }

    pub async fn propose(&self, req: &ProposalRequest<'_>) -> Result<Proposal, ProposalFailure> {
        let (locals, region) = self.plan_moves(req);
        let mut rejected = Vec::new();
        let mut attempt = 0;

        for candidate in locals {
            attempt += 1;
            let reasons = self.validate(&candidate.plan, req, None);
            if reasons.is_empty() {
                info!(applied = %candidate.applied, version = candidate.plan.version, "{}", candidate.description);
                return Ok(Proposal {
                    plan: candidate.plan,
                    applied: candidate.applied,
                    description: candidate.description,
                    rejected,
                });
            }
            debug!(applied = %candidate.applied, ?reasons, "Local candidate rejected");
            rejected.push(RejectedCandidate { attempt, source: candidate.applied, reasons });
        }

        self.synthesize(req, region, rejected, attempt).await
    }

    fn validate(&self, candidate: &Plan, req: &ProposalRequest<'_>, region: Option<PatchRegion>) -> Vec<String> {
        let ctx = ValidationContext {
            current: req.plan,
            spec: req.spec,
            index: &self.index,
            layout: &self.layout,
            region,
        };
        validate_candidate(candidate, &ctx)
    }

    /// Ordered local candidates plus the region to synthesize if none holds.
    fn plan_moves(&self, req: &ProposalRequest<'_>) -> (Vec<Candidate>, PatchRegion) {
        let verdict = req.classification.verdict;
        let (locals, region) = match verdict {
            Verdict::BuildFail => self.build_fail_moves(req),
            Verdict::WrongSite => (self.wrong_site_moves(req), PatchRegion::Full),
            Verdict::NoReproduction => (self.no_reproduction_moves(req), PatchRegion::Full),
            _ => (Vec::new(), PatchRegion::Full),
        };

        // Without a check nothing can turn GREEN; ask for one before anything
        // except mechanical build repairs.
        if req.plan.assertion.is_none() && (verdict != Verdict::BuildFail || locals.is_empty()) {
            return (Vec::new(), PatchRegion::Assertion);
        }
        (locals, region)
    }

    fn build_fail_moves(&self, req: &ProposalRequest<'_>) -> (Vec<Candidate>, PatchRegion) {
        let plan = req.plan;
        let mut locals = Vec::new();
        let region = match &req.build.failure {
            Some(BuildFailure::MissingSymbol { symbols }) => {
                let missing: Vec<&String> = symbols.iter()
                    .filter(|s| is_identifier(s) && !plan.stubs.contains_key(*s))
                    .collect();
                if !missing.is_empty() {
                    let mut next = plan.successor();
                    for symbol in &missing {
                        next.stubs.insert((*symbol).clone(), Stub::pass_through());
                        next.touch(PlanField::Stub((*symbol).clone()), req.iteration);
                    }
                    let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
                    locals.push(Candidate {
                        plan: next,
                        applied: RefinementMove::AddStubs,
                        description: format!("Added pass-through stubs for {}", names.join(", ")),
                    });
                }
                PatchRegion::Stubs
            }
            Some(BuildFailure::Link { duplicates }) => {
                let conflicting: Vec<&String> = duplicates.iter()
                    .filter(|d| plan.stubs.contains_key(*d))
                    .collect();
                if !conflicting.is_empty() {
                    let mut next = plan.successor();
                    for name in &conflicting {
                        next.stubs.remove(*name);
                        next.provenance.remove(&PlanField::Stub((*name).clone()).key());
                    }
                    let names: Vec<&str> = conflicting.iter().map(|s| s.as_str()).collect();
                    locals.push(Candidate {
                        plan: next,
                        applied: RefinementMove::DropStubs,
                        description: format!("Dropped stubs that duplicate real definitions: {}", names.join(", ")),
                    });
                }
                PatchRegion::Stubs
            }
            Some(BuildFailure::Timeout) => {
                if let Some(budget) = plan.budget.widened_build(&self.settings.ceiling) {
                    let mut next = plan.successor();
                    next.budget = budget;
                    next.touch(PlanField::Budget, req.iteration);
                    locals.push(Candidate {
                        plan: next,
                        applied: RefinementMove::WidenBuildTimeout,
                        description: format!(
                            "Build timeout widened {}s -> {}s",
                            plan.budget.build_timeout_secs, budget.build_timeout_secs
                        ),
                    });
                }
                PatchRegion::Full
            }
            Some(BuildFailure::Syntax { location }) => syntax_region(location.as_ref(), plan),
            None => PatchRegion::Full,
        };
        (locals, region)
    }

    fn wrong_site_moves(&self, req: &ProposalRequest<'_>) -> Vec<Candidate> {
        let plan = req.plan;
        let mut locals = Vec::new();
        let hit = decisive_hit(req.report, req.spec);

        if let Some(hit) = hit {
            let hit_line = hit.location.as_ref().and_then(|loc| self.index.line_text(loc));
            let hosts: Vec<String> = plan.stubs.iter()
                .filter(|(_, stub)| stub.behavior != StubBehavior::PassThrough)
                .filter(|(name, _)| {
                    hit.function.as_deref() == Some(name.as_str())
                        || hit_line.is_some_and(|text| calls(text, name))
                })
                .map(|(name, _)| name.clone())
                .collect();
            if !hosts.is_empty() {
                let mut next = plan.successor();
                for name in &hosts {
                    if let Some(stub) = next.stubs.get_mut(name) {
                        stub.behavior = StubBehavior::PassThrough;
                    }
                    next.touch(PlanField::Stub(name.clone()), req.iteration);
                }
                locals.push(Candidate {
                    plan: next,
                    applied: RefinementMove::TightenStub,
                    description: format!("Tightened stubs {} to pass-through", hosts.join(", ")),
                });
            }
        }

        let site = req.spec.site();
        for (i, input) in plan.symbolic_inputs.iter().enumerate() {
            let Some(relocation) = relocation_target(input, plan, req.spec, &site) else { continue };
            let mut next = plan.successor();
            let from = next.symbolic_inputs[i].injection.to_string();
            next.symbolic_inputs[i].injection = relocation.site.clone();
            next.touch(PlanField::Input(input.name.clone()), req.iteration);
            if !relocation.handed_over.is_empty() {
                for &(ci, ai) in &relocation.handed_over {
                    next.driver.calls[ci].args[ai] = "0".to_string();
                }
                next.touch(PlanField::Driver, req.iteration);
            }
            locals.push(Candidate {
                plan: next,
                applied: RefinementMove::RelocateInjection,
                description: format!("Relocated input '{}' from {} to {}", input.name, from, relocation.site),
            });
        }
        locals
    }

    fn no_reproduction_moves(&self, req: &ProposalRequest<'_>) -> Vec<Candidate> {
        let plan = req.plan;
        let mut locals = Vec::new();

        if let Some(cause) = req.classification.cause {
            if let Some(budget) = plan.budget.widened(&self.settings.ceiling) {
                let mut next = plan.successor();
                next.budget = budget;
                next.touch(PlanField::Budget, req.iteration);
                locals.push(Candidate {
                    plan: next,
                    applied: RefinementMove::WidenExecutionBudget,
                    description: format!(
                        "Execution budget widened after {:?}: {}s/{}MB/{} instructions",
                        cause, budget.time_secs, budget.max_memory_mb, budget.max_instructions
                    ),
                });
                return locals;
            }
            debug!("Execution budget already at its ceiling");
        }

        let tried = req.trace.records.iter()
            .filter(|r| r.verdict == Verdict::NoReproduction)
            .filter_map(|r| r.refinement.as_ref())
            .filter(|s| EXPLORATION_MOVES.contains(&s.applied))
            .count() as u32;
        if tried >= self.settings.local_move_limit {
            debug!(tried, limit = self.settings.local_move_limit, "Local moves exhausted");
            return locals;
        }

        for (name, stub) in &plan.stubs {
            if let StubBehavior::Symbolic { min, max } = stub.behavior {
                if min.is_none() && max.is_none() {
                    continue;
                }
                let (lo, hi) = widen_range(min, max);
                let mut next = plan.successor();
                if let Some(s) = next.stubs.get_mut(name) {
                    s.behavior = StubBehavior::Symbolic { min: lo, max: hi };
                }
                next.touch(PlanField::Stub(name.clone()), req.iteration);
                locals.push(Candidate {
                    plan: next,
                    applied: RefinementMove::WidenStubRange,
                    description: format!("Widened stub '{}' to {}", name, StubBehavior::Symbolic { min: lo, max: hi }.label()),
                });
            }
        }

        // Fixed values first, then pass-throughs.
        let relaxable = plan.stubs.iter()
            .filter(|(_, s)| matches!(s.behavior, StubBehavior::FixedValue { .. }))
            .chain(plan.stubs.iter().filter(|(_, s)| {
                s.behavior == StubBehavior::PassThrough && s.return_type.trim() != "void"
            }));
        for (name, stub) in relaxable {
            let mut next = plan.successor();
            if let Some(s) = next.stubs.get_mut(name) {
                s.behavior = StubBehavior::Symbolic { min: None, max: None };
            }
            next.touch(PlanField::Stub(name.clone()), req.iteration);
            locals.push(Candidate {
                plan: next,
                applied: RefinementMove::RelaxStub,
                description: format!("Relaxed stub '{}' from {} to symbolic", name, stub.behavior.label()),
            });
        }

        for (i, input) in plan.symbolic_inputs.iter().enumerate() {
            if !input.is_ranged() {
                continue;
            }
            let (lo, hi) = widen_range(input.min, input.max);
            let mut next = plan.successor();
            next.symbolic_inputs[i].min = lo;
            next.symbolic_inputs[i].max = hi;
            next.touch(PlanField::Input(input.name.clone()), req.iteration);
            locals.push(Candidate {
                plan: next,
                applied: RefinementMove::WidenInputRange,
                description: format!("Widened range of input '{}'", input.name),
            });
        }

        if let Some(candidate) = promote_argument(plan, req.spec, req.iteration) {
            locals.push(candidate);
        }
        locals
    }

    async fn synthesize(
        &self,
        req: &ProposalRequest<'_>,
        region: PatchRegion,
        mut rejected: Vec<RejectedCandidate>,
        mut attempt: u32,
    ) -> Result<Proposal, ProposalFailure> {
        let diagnostic = diagnostic_for(req);
        let source_excerpt = self.index.excerpt(&req.spec.site(), EXCERPT_RADIUS);
        let mut constraints: Vec<String> = Vec::new();

        for _ in 0..self.settings.max_patch_retries {
            attempt += 1;
            let request = SynthesisRequest {
                spec: req.spec,
                plan: req.plan,
                region,
                verdict: req.classification.verdict,
                diagnostic: diagnostic.clone(),
                source_excerpt: source_excerpt.clone(),
                rejections: &constraints,
            };
            let text = match with_retry("synthesize", &self.settings.retry, || {
                self.synthesizer.synthesize(&request)
            }).await {
                Ok(text) => text,
                Err(error) => return Err(ProposalFailure { error, rejected }),
            };

            let reasons = match parse_patch(&text) {
                Ok(patch) if patch.is_empty() => vec!["patch changes nothing".to_string()],
                Ok(patch) => {
                    let candidate = patch.apply(req.plan, req.spec, req.iteration);
                    let reasons = self.validate(&candidate, req, Some(region));
                    if reasons.is_empty() {
                        info!(region = %region, attempt, version = candidate.version, "Synthesized patch accepted");
                        return Ok(Proposal {
                            plan: candidate,
                            applied: RefinementMove::Synthesized,
                            description: format!("Applied synthesized {} patch from {}", region, self.synthesizer.name()),
                            rejected,
                        });
                    }
                    reasons
                }
                Err(e) => vec![e.to_string()],
            };

            warn!(region = %region, attempt, ?reasons, "Synthesized patch rejected");
            constraints.extend(reasons.iter().cloned());
            rejected.push(RejectedCandidate { attempt, source: RefinementMove::Synthesized, reasons });
        }

        Err(ProposalFailure {
            error: CegirError::PatchValidation(format!(
                "No valid {} patch after {} synthesis attempts", region, self.settings.max_patch_retries
            )),
            rejected,
        })
    }
}

/// Region to resynthesize for a compile error at `location`.
fn syntax_region(location: Option<&SourceLocation>, plan: &Plan) -> PatchRegion {
    let Some(location) = location else { return PatchRegion::Full };
    if paths_match(&location.file, STUBS_FILE) {
        return PatchRegion::Stubs;
    }
    if paths_match(&location.file, &plan.driver.path.to_string_lossy()) {
        return PatchRegion::Driver;
    }
    if plan.assertion.as_ref().is_some_and(|a| a.location.same_site(location)) {
        return PatchRegion::Assertion;
    }
    if plan.symbolic_inputs.iter().any(|i| i.injection.line == Some(location.line)) {
        return PatchRegion::Driver;
    }
    PatchRegion::Full
}

struct Relocation {
    site: InjectionSite,
    /// `(call, argument)` slots that passed the input from the driver and
    /// now receive a zero literal.
    handed_over: Vec<(usize, usize)>,
}

/// Next injection point toward the fault: the target function's entry,
/// then immediately before the fault line. A driver input moves only when
/// it reaches the target function as its same-named scalar parameter.
fn relocation_target(
    input: &SymbolicInput,
    plan: &Plan,
    spec: &VulnerabilitySpec,
    site: &SourceLocation,
) -> Option<Relocation> {
    let current = &input.injection;
    let next = if current.function == DRIVER_ENTRY {
        let handed_over = driver_handover(input, plan, spec)?;
        return Some(Relocation {
            site: InjectionSite { function: spec.function.clone(), line: None },
            handed_over,
        });
    } else if current.function != spec.function {
        InjectionSite { function: spec.function.clone(), line: None }
    } else if current.line != Some(site.line) {
        InjectionSite { function: spec.function.clone(), line: Some(site.line) }
    } else {
        return None;
    };
    Some(Relocation { site: next, handed_over: Vec::new() })
}

/// Driver slots through which `input` is passed as the target function's
/// parameter of the same name. `None` for buffers, for inputs that are not
/// a parameter, and when the driver uses the input anywhere else.
fn driver_handover(input: &SymbolicInput, plan: &Plan, spec: &VulnerabilitySpec) -> Option<Vec<(usize, usize)>> {
    if input.len.is_some() {
        return None;
    }
    let position = spec.facts.parameters.iter().position(|p| p.name == input.name)?;
    let mut slots = Vec::new();
    for (ci, call) in plan.driver.calls.iter().enumerate() {
        for (ai, arg) in call.args.iter().enumerate() {
            if !mentions(arg, &input.name) {
                continue;
            }
            if call.function == spec.function && ai == position && arg.trim() == input.name {
                slots.push((ci, ai));
            } else {
                return None;
            }
        }
    }
    (!slots.is_empty()).then_some(slots)
}

/// Double a closed range around itself; half-open ranges become unbounded.
/// Non-negative lower bounds stay non-negative.
fn widen_range(min: Option<i64>, max: Option<i64>) -> (Option<i64>, Option<i64>) {
    match (min, max) {
        (Some(lo), Some(hi)) => {
            let span = hi.saturating_sub(lo).max(1);
            let new_lo = lo.saturating_sub(span);
            let new_lo = if lo >= 0 { new_lo.max(0) } else { new_lo };
            (Some(new_lo), Some(hi.saturating_add(span)))
        }
        _ => (None, None),
    }
}

/// Replace the first integer-literal driver argument with a fresh symbolic input.
fn promote_argument(plan: &Plan, spec: &VulnerabilitySpec, iteration: u32) -> Option<Candidate> {
    for (ci, call) in plan.driver.calls.iter().enumerate() {
        for (ai, arg) in call.args.iter().enumerate() {
            if !is_int_literal(arg) {
                continue;
            }
            let param = (call.function == spec.function)
                .then(|| spec.facts.parameters.get(ai))
                .flatten()
                .filter(|p| !p.ty.contains('*'));
            let ty = param.map(|p| p.ty.trim().to_string()).unwrap_or_else(|| "long".to_string());
            let mut name = param.map(|p| p.name.clone()).unwrap_or_else(|| format!("cegir_arg{}", ai));
            let mut n = 1;
            while plan.input(&name).is_some() {
                name = format!("cegir_arg{}_{}", ai, n);
                n += 1;
            }

            let mut next = plan.successor();
            next.symbolic_inputs.push(SymbolicInput {
                name: name.clone(),
                ty,
                len: None,
                min: None,
                max: None,
                injection: InjectionSite::driver(),
            });
            next.driver.calls[ci].args[ai] = name.clone();
            next.touch(PlanField::Input(name.clone()), iteration);
            next.touch(PlanField::Driver, iteration);
            return Some(Candidate {
                plan: next,
                applied: RefinementMove::PromoteArgument,
                description: format!("Made argument {} of {} symbolic as '{}' (was {})", ai, call.function, name, arg),
            });
        }
    }
    None
}

fn is_int_literal(arg: &str) -> bool {
    let t = arg.trim();
    let t = t.strip_prefix('-').unwrap_or(t);
    let t = t.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

/// `name(` appears in `line` as a call, not as part of a longer identifier.
fn calls(line: &str, name: &str) -> bool {
    line.match_indices(name).any(|(pos, _)| {
        let before = line[..pos].chars().next_back();
        let after = line[pos + name.len()..].trim_start().chars().next();
        !before.is_some_and(|c| c == '_' || c.is_ascii_alphanumeric()) && after == Some('(')
    })
}

/// `name` appears in `text` as a whole identifier.
fn mentions(text: &str, name: &str) -> bool {
    let ident = |c: Option<char>| c.is_some_and(|c| c == '_' || c.is_ascii_alphanumeric());
    text.match_indices(name).any(|(pos, _)| {
        !ident(text[..pos].chars().next_back()) && !ident(text[pos + name.len()..].chars().next())
    })
}

fn diagnostic_for(req: &ProposalRequest<'_>) -> String {
    let site = req.spec.site();
    match req.classification.verdict {
        Verdict::BuildFail => {
            let reason = req.build.failure.as_ref().map(|f| f.as_str()).unwrap_or("unknown");
            format!("Build failed ({}):\n{}", reason, truncate_output(&req.build.diagnostic))
        }
        Verdict::WrongSite => match decisive_hit(req.report, req.spec) {
            Some(hit) => {
                let at = hit.location.as_ref().map(|l| l.to_string()).unwrap_or_else(|| "unknown location".into());
                let mut text = format!(
                    "{:?} fired at {} (expected {}){}: {}",
                    hit.kind,
                    at,
                    site,
                    hit.function.as_ref().map(|f| format!(" in {}", f)).unwrap_or_default(),
                    hit.message
                );
                if !hit.counterexample.is_empty() {
                    text.push_str("\nCounterexample:");
                    for value in &hit.counterexample.values {
                        match value.int {
                            Some(int) => text.push_str(&format!("\n  {} = {} ({})", value.name, int, value.hex)),
                            None => text.push_str(&format!("\n  {} = {}", value.name, value.hex)),
                        }
                    }
                }
                text
            }
            None => format!("A different site fired (expected {})", site),
        },
        Verdict::NoReproduction => {
            let mut text = format!(
                "{} paths explored, {} instructions, nothing fired at {}",
                req.report.paths_explored, req.report.instructions, site
            );
            if let Some(cause) = req.classification.cause {
                text.push_str(&format!("; engine stopped early ({:?})", cause));
            }
            text
        }
        other => format!("Verdict {}", other),
    }
}
