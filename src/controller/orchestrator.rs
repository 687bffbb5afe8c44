use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::audit::AuditSession;
use crate::classifier::{classify, decisive_hit};
use crate::errors::{with_retry, CegirError};
use crate::harness::{render, HarnessLayout, SourceIndex};
use crate::models::{
    BuildDescription, BuildResult, Classification, ExecutionReport, Plan, RefinementSummary,
    Timings, Trace, TraceRecord, Verdict, VulnerabilitySpec,
};
use crate::refine::{ProposalRequest, RefinementProposer};
use crate::store::{validate_lineage_id, PlanStore};
use crate::toolchain::{BuildExecutor, BuildRequest, ExecutionRequest, SymbolicRunner};
use super::state::*;
use tracing::{error, info, warn};

/// Collaborators one lineage runs against.
pub struct LoopDependencies {
    pub description: Arc<BuildDescription>,
    pub layout: HarnessLayout,
    pub index: Arc<SourceIndex>,
    pub builder: Arc<dyn BuildExecutor>,
    pub runner: Arc<dyn SymbolicRunner>,
    pub proposer: Arc<RefinementProposer>,
    pub store: Arc<PlanStore>,
}

/// Drives one lineage through BUILD -> EXECUTE -> CLASSIFY -> REFINE until
/// GREEN or a terminal verdict. Iterations are numbered from 1; each one
/// appends exactly one trace record and commits at most one plan.
pub struct CegirController {
    config: ControllerConfig,
    spec: Arc<VulnerabilitySpec>,
    deps: LoopDependencies,
    audit: Option<Arc<AuditSession>>,
    cancel_token: CancellationToken,
    event_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
}

enum Step<T> {
    Done(T),
    Infra(CegirError),
}

impl CegirController {
    pub fn new(config: ControllerConfig, spec: Arc<VulnerabilitySpec>, deps: LoopDependencies) -> Self {
        Self {
            config,
            spec,
            deps,
            audit: None,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// Share a cancel token with the caller (ctrl-c handler, batch runner).
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditSession>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn lineage(&self) -> &str {
        &self.config.lineage
    }

    pub fn store(&self) -> &Arc<PlanStore> {
        &self.deps.store
    }

    pub fn spec(&self) -> &VulnerabilitySpec {
        &self.spec
    }

    /// Lineage directory holding the audit streams, when auditing is on.
    pub fn audit_dir(&self) -> Option<&std::path::Path> {
        self.audit.as_ref().map(|a| a.base_dir())
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn enter(&self, state: LoopState) {
        self.emit(LoopEvent::StateChanged { lineage: self.config.lineage.clone(), state });
    }

    /// Run the lineage from `seed`. `Err` is returned only for invalid input
    /// or a seed that cannot be committed; every failure after that ends in
    /// a terminal verdict on the returned outcome.
    pub async fn run(&self, seed: Plan) -> Result<LoopOutcome, CegirError> {
        let started = Instant::now();
        let lineage = self.config.lineage.clone();
        self.validate_inputs(&seed)?;

        let mut plan = self.deps.store.commit(&lineage, seed).await?;
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.lineage_started(&self.spec, self.config.budget).await {
                warn!(lineage = %lineage, error = %e, "Failed to record lineage start");
            }
        }
        self.audit_commit(plan.version).await;
        info!(
            lineage = %lineage,
            spec = %self.spec.id,
            site = %self.spec.site(),
            budget = self.config.budget,
            "Refinement loop started"
        );

        let mut trace = Trace::default();
        let mut iteration: u32 = 1;

        let (verdict, error) = loop {
            if self.cancel_token.is_cancelled() {
                info!(lineage = %lineage, iteration, "Cancelled before build");
                break (Verdict::Cancelled, None);
            }
            self.emit(LoopEvent::IterationStarted {
                lineage: lineage.clone(),
                iteration,
                plan_version: plan.version,
            });
            let started_at = Utc::now();
            let mut timings = Timings::default();

            self.enter(LoopState::Build);
            let clock = Instant::now();
            let build = match self.build(&plan).await {
                Step::Done(build) => build,
                Step::Infra(e) => {
                    timings.build_ms = clock.elapsed().as_millis() as u64;
                    error!(lineage = %lineage, iteration, error = %e, "Build could not be run");
                    let record = infra_record(iteration, &plan, timings, &e, started_at);
                    self.push(&mut trace, record).await;
                    break (Verdict::InfraError, Some(e.to_string()));
                }
            };
            timings.build_ms = clock.elapsed().as_millis() as u64;

            let report = if build.success {
                self.enter(LoopState::Execute);
                let clock = Instant::now();
                match self.execute(&plan, &build).await {
                    Step::Done(report) => {
                        timings.execute_ms = clock.elapsed().as_millis() as u64;
                        report
                    }
                    Step::Infra(e) => {
                        timings.execute_ms = clock.elapsed().as_millis() as u64;
                        error!(lineage = %lineage, iteration, error = %e, "Symbolic execution could not be run");
                        let record = infra_record(iteration, &plan, timings, &e, started_at);
                        self.push(&mut trace, record).await;
                        break (Verdict::InfraError, Some(e.to_string()));
                    }
                }
            } else {
                ExecutionReport::skipped()
            };

            self.enter(LoopState::Classify);
            let classification = classify(&build, &report, &self.spec);
            let mut record = self.record(iteration, &plan, classification, &build, &report, timings, started_at);
            info!(
                lineage = %lineage,
                iteration,
                plan_version = plan.version,
                verdict = %classification.verdict,
                paths = report.paths_explored,
                "Iteration classified"
            );
            self.emit(LoopEvent::Classified {
                lineage: lineage.clone(),
                iteration,
                verdict: classification.verdict,
            });

            if classification.verdict == Verdict::Green {
                self.push(&mut trace, record).await;
                break (Verdict::Green, None);
            }
            if iteration >= self.config.budget {
                self.push(&mut trace, record).await;
                break (Verdict::BudgetExhausted, None);
            }
            if self.cancel_token.is_cancelled() {
                info!(lineage = %lineage, iteration, "Cancelled before refinement");
                self.push(&mut trace, record).await;
                break (Verdict::Cancelled, None);
            }

            self.enter(LoopState::Refine);
            let clock = Instant::now();
            let request = ProposalRequest {
                plan: &plan,
                classification,
                build: &build,
                report: &report,
                spec: &self.spec,
                iteration,
                trace: &trace,
            };
            let proposal = self.deps.proposer.propose(&request).await;
            record.timings.refine_ms = clock.elapsed().as_millis() as u64;

            match proposal {
                Ok(proposal) => {
                    record.rejected = proposal.rejected;
                    record.refinement = Some(RefinementSummary {
                        applied: proposal.applied,
                        description: proposal.description,
                        next_version: proposal.plan.version,
                    });
                    self.push(&mut trace, record).await;

                    // Commit is the last action of the iteration.
                    match self.deps.store.commit(&lineage, proposal.plan).await {
                        Ok(next) => {
                            self.emit(LoopEvent::PlanCommitted {
                                lineage: lineage.clone(),
                                version: next.version,
                                applied: proposal.applied,
                            });
                            self.audit_commit(next.version).await;
                            plan = next;
                        }
                        Err(e) => {
                            error!(lineage = %lineage, iteration, error = %e, "Plan commit failed");
                            break (Verdict::InfraError, Some(e.to_string()));
                        }
                    }
                }
                Err(failure) => {
                    warn!(lineage = %lineage, iteration, error = %failure.error, "No acceptable refinement");
                    record.rejected = failure.rejected;
                    record.error = Some(failure.error.to_string());
                    self.push(&mut trace, record).await;
                    break (Verdict::InfraError, Some(failure.error.to_string()));
                }
            }

            iteration += 1;
        };

        self.enter(LoopState::Done);
        let duration_ms = started.elapsed().as_millis() as u64;
        let synthesis_cost_usd = self.deps.proposer.synthesis_cost_usd();
        if let Some(audit) = &self.audit {
            if let Err(e) = audit
                .lineage_finished(verdict, plan.version, duration_ms, synthesis_cost_usd, error.clone())
                .await
            {
                warn!(lineage = %lineage, error = %e, "Failed to record lineage result");
            }
        }
        info!(
            lineage = %lineage,
            verdict = %verdict,
            iterations = trace.len(),
            plan_version = plan.version,
            duration_ms,
            "Refinement loop finished"
        );
        self.emit(LoopEvent::Finished {
            lineage: lineage.clone(),
            verdict,
            iterations: trace.len() as u32,
            duration_ms,
        });

        Ok(LoopOutcome {
            lineage,
            verdict,
            plan,
            trace,
            error,
            duration_ms,
            synthesis_cost_usd,
        })
    }

    fn validate_inputs(&self, seed: &Plan) -> Result<(), CegirError> {
        if self.config.budget == 0 {
            return Err(CegirError::Input("Iteration budget must be at least 1".into()));
        }
        validate_lineage_id(&self.config.lineage)?;
        self.spec.validate()?;
        self.deps.description.validate()?;
        if seed.version != 0 {
            return Err(CegirError::Input(format!("Seed plan must be version 0, got {}", seed.version)));
        }
        seed.validate_structure()?;
        render(seed, &self.spec, &self.deps.index, &self.deps.layout)
            .map_err(|e| CegirError::Input(format!("Seed plan cannot be rendered: {}", e)))?;
        Ok(())
    }

    async fn build(&self, plan: &Plan) -> Step<BuildResult> {
        let bundle = match render(plan, &self.spec, &self.deps.index, &self.deps.layout) {
            Ok(bundle) => bundle,
            Err(e) => return Step::Infra(e),
        };
        let request = BuildRequest {
            description: &self.deps.description,
            plan,
            bundle: &bundle,
            layout: &self.deps.layout,
        };
        match with_retry("build", &self.config.retry, || self.deps.builder.build(&request)).await {
            Ok(build) => Step::Done(build),
            Err(e) => Step::Infra(e),
        }
    }

    async fn execute(&self, plan: &Plan, build: &BuildResult) -> Step<ExecutionReport> {
        let Some(artifact) = build.artifact.as_deref() else {
            return Step::Infra(CegirError::Internal("Successful build produced no artifact".into()));
        };
        let work_dir = self.deps.layout.version_dir(plan.version);
        let request = ExecutionRequest {
            artifact,
            inputs: &plan.symbolic_inputs,
            budget: plan.budget,
            work_dir: &work_dir,
        };
        match with_retry("execute", &self.config.retry, || self.deps.runner.execute(&request)).await {
            Ok(report) => Step::Done(report),
            Err(e) => Step::Infra(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        iteration: u32,
        plan: &Plan,
        classification: Classification,
        build: &BuildResult,
        report: &ExecutionReport,
        timings: Timings,
        started_at: chrono::DateTime<Utc>,
    ) -> TraceRecord {
        let hit = decisive_hit(report, &self.spec);
        TraceRecord {
            iteration,
            plan_version: plan.version,
            verdict: classification.verdict,
            cause: classification.cause,
            build_failure: build.failure.clone(),
            executed: report.executed,
            outcome: report.executed.then_some(report.outcome),
            paths_explored: report.paths_explored,
            hit_location: hit.and_then(|h| h.location.clone()),
            counterexample: hit.map(|h| h.counterexample.clone()).filter(|c| !c.is_empty()),
            timings,
            refinement: None,
            rejected: vec![],
            error: None,
            started_at,
        }
    }

    async fn push(&self, trace: &mut Trace, record: TraceRecord) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record_iteration(&record).await {
                warn!(lineage = %self.config.lineage, iteration = record.iteration, error = %e, "Failed to append trace record");
            }
        }
        trace.push(record);
    }

    async fn audit_commit(&self, version: u32) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.plan_committed(version).await {
                warn!(lineage = %self.config.lineage, version, error = %e, "Failed to log plan commit");
            }
        }
    }
}

fn infra_record(
    iteration: u32,
    plan: &Plan,
    timings: Timings,
    error: &CegirError,
    started_at: chrono::DateTime<Utc>,
) -> TraceRecord {
    TraceRecord {
        iteration,
        plan_version: plan.version,
        verdict: Verdict::InfraError,
        cause: None,
        build_failure: None,
        executed: false,
        outcome: None,
        paths_explored: 0,
        hit_location: None,
        counterexample: None,
        timings,
        refinement: None,
        rejected: vec![],
        error: Some(error.to_string()),
        started_at,
    }
}
