#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use cegir::controller::{CegirController, ControllerConfig, LoopDependencies};
use cegir::errors::{CegirError, RetryConfig};
use cegir::harness::{HarnessLayout, SourceIndex};
use cegir::models::spec::{BugClass, FactPack, Parameter};
use cegir::models::{
    BuildDescription, BuildResult, Counterexample, ExecutionOutcome, ExecutionReport, HitKind,
    InputValue, Plan, SiteHit, SourceLocation, VulnerabilitySpec,
};
use cegir::refine::{ProposerSettings, RefinementProposer, SynthesisCollaborator, SynthesisRequest};
use cegir::store::PlanStore;
use cegir::toolchain::{BuildExecutor, BuildRequest, ExecutionRequest, SymbolicRunner};
use tempfile::TempDir;

pub const PARSER_C: &str = "#include <string.h>
int read_u16(const unsigned char *p);

int parse_record(unsigned char *buf, int n) {
    char out[16];
    int len = read_u16(buf);
    if (len < 0 || n < 2)
        return -1;
    memcpy(out, buf + 2, len);
    return out[0];
}
";

/// Line of the `memcpy` in [`PARSER_C`].
pub const SITE_LINE: u32 = 9;

pub fn spec() -> VulnerabilitySpec {
    VulnerabilitySpec {
        id: "parser-oob".into(),
        file: "src/parser.c".into(),
        function: "parse_record".into(),
        line: SITE_LINE,
        bug_class: BugClass::OutOfBoundsWrite,
        evidence: vec![],
        facts: FactPack {
            parameters: vec![
                Parameter { name: "buf".into(), ty: "unsigned char *".into() },
                Parameter { name: "n".into(), ty: "int".into() },
            ],
            ..Default::default()
        },
        assertion_hint: Some("len <= (int)sizeof(out)".into()),
    }
}

/// A source tree on disk plus everything a controller needs besides adapters.
pub struct Fixture {
    pub dir: TempDir,
    pub spec: VulnerabilitySpec,
    pub description: BuildDescription,
    pub index: Arc<SourceIndex>,
    pub layout: HarnessLayout,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/parser.c"), PARSER_C).unwrap();

        let description: BuildDescription = serde_json::from_value(serde_json::json!({
            "source_root": root,
            "sources": ["src/parser.c"],
        })).unwrap();
        let index = Arc::new(SourceIndex::scan(&root).unwrap());
        let layout = HarnessLayout::new(&root, dir.path().join("work"));
        Self { dir, spec: spec(), description, index, layout }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn seed(&self) -> Plan {
        Plan::seed(&self.spec, Default::default())
    }

    pub fn controller(
        &self,
        budget: u32,
        builder: Arc<dyn BuildExecutor>,
        runner: Arc<dyn SymbolicRunner>,
        synthesizer: Arc<dyn SynthesisCollaborator>,
        store: Arc<PlanStore>,
    ) -> CegirController {
        let settings = ProposerSettings { retry: RetryConfig::no_retries(), ..Default::default() };
        let proposer = RefinementProposer::new(synthesizer, self.index.clone(), self.layout.clone(), settings);
        let config = ControllerConfig::new("parser-oob-test", budget).with_retry(fast_retry());
        let deps = LoopDependencies {
            description: Arc::new(self.description.clone()),
            layout: self.layout.clone(),
            index: self.index.clone(),
            builder,
            runner,
            proposer: Arc::new(proposer),
            store,
        };
        CegirController::new(config, Arc::new(self.spec.clone()), deps)
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig { max_retries: 2, base_delay: Duration::from_millis(1) }
}

type BuildScript = dyn Fn(&Plan, u32) -> Result<BuildResult, CegirError> + Send + Sync;
type RunScript = dyn Fn(&ExecutionRequest<'_>, u32) -> Result<ExecutionReport, CegirError> + Send + Sync;

/// Build executor answering from a closure over (plan, call number).
pub struct FakeBuilder {
    calls: AtomicU32,
    script: Box<BuildScript>,
}

impl FakeBuilder {
    pub fn new(script: impl Fn(&Plan, u32) -> Result<BuildResult, CegirError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), script: Box::new(script) })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::new(|_, _| Ok(built()))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildExecutor for FakeBuilder {
    async fn build(&self, request: &BuildRequest<'_>) -> Result<BuildResult, CegirError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.script)(request.plan, n)
    }
}

/// Symbolic runner answering from a closure over (request, call number).
pub struct FakeRunner {
    calls: AtomicU32,
    script: Box<RunScript>,
}

impl FakeRunner {
    pub fn new(
        script: impl Fn(&ExecutionRequest<'_>, u32) -> Result<ExecutionReport, CegirError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), script: Box::new(script) })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SymbolicRunner for FakeRunner {
    async fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionReport, CegirError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.script)(request, n)
    }
}

/// Collaborator replaying canned patch texts; `{}` once they run out.
pub struct ScriptedSynthesizer {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicU32,
}

impl ScriptedSynthesizer {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisCollaborator for ScriptedSynthesizer {
    async fn synthesize(&self, _request: &SynthesisRequest<'_>) -> Result<String, CegirError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.replies.lock().unwrap().pop_front().unwrap_or_else(|| "{}".into()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn built() -> BuildResult {
    BuildResult::succeeded(PathBuf::from("harness.bc"), String::new(), 2)
}

pub fn report(outcome: ExecutionOutcome, hits: Vec<SiteHit>) -> ExecutionReport {
    ExecutionReport {
        outcome,
        paths_explored: 6,
        instructions: 4096,
        hits,
        duration_ms: 3,
        executed: true,
        log_excerpt: String::new(),
    }
}

pub fn target_hit(line: u32) -> SiteHit {
    SiteHit {
        kind: HitKind::Assertion,
        location: Some(SourceLocation::new("src/parser.c", line)),
        function: Some("parse_record".into()),
        message: "cegir target check".into(),
        is_target: true,
        counterexample: Counterexample {
            values: vec![InputValue { name: "n".into(), hex: "0x00000040".into(), int: Some(64) }],
        },
    }
}

pub fn reached(line: u32) -> ExecutionReport {
    report(ExecutionOutcome::TargetAssertionReached, vec![target_hit(line)])
}

pub fn quiet() -> ExecutionReport {
    report(ExecutionOutcome::NoIssue, vec![])
}
