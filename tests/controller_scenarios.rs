mod common;

use std::sync::{Arc, Mutex};
use cegir::controller::{LoopEvent, LoopState};
use cegir::errors::CegirError;
use cegir::models::{
    BuildFailure, BuildResult, ExecutionOutcome, InjectionSite, RefinementMove, ResourceCause, Stub,
    StubBehavior, Verdict,
};
use cegir::refine::UnavailableSynthesizer;
use cegir::store::PlanStore;
use common::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_missing_symbol_gets_a_stub_and_the_next_build_succeeds() {
    let fx = Fixture::new();
    let builder = FakeBuilder::new(|plan, _| {
        if plan.stubs.contains_key("read_u16") {
            Ok(built())
        } else {
            Ok(BuildResult::failed(
                BuildFailure::MissingSymbol { symbols: vec!["read_u16".into()] },
                "undefined reference to `read_u16'".into(),
                4,
            ))
        }
    });
    let runner = FakeRunner::new(|_, _| Ok(reached(SITE_LINE)));
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(5, builder.clone(), runner.clone(), Arc::new(UnavailableSynthesizer), store.clone());

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Green);
    assert_eq!(outcome.iterations(), 2);
    let first = &outcome.trace.records[0];
    assert_eq!(first.verdict, Verdict::BuildFail);
    assert!(matches!(first.build_failure, Some(BuildFailure::MissingSymbol { .. })));
    assert_eq!(first.refinement.as_ref().unwrap().applied, RefinementMove::AddStubs);

    // The runner never sees a plan that failed to build.
    assert!(!first.executed);
    assert!(first.outcome.is_none());
    assert_eq!(builder.calls(), 2);
    assert_eq!(runner.calls(), 1);

    assert_eq!(outcome.plan.version, 1);
    assert_eq!(outcome.plan.stubs["read_u16"], Stub::pass_through());
    assert_eq!(store.versions(controller.lineage()), vec![0, 1]);
}

#[tokio::test]
async fn test_hit_on_another_line_relocates_the_injection() {
    let fx = Fixture::new();
    let mut seed = fx.seed();
    let n = seed.symbolic_inputs.iter_mut().find(|i| i.name == "n").unwrap();
    n.injection = InjectionSite { function: "parse_record".into(), line: None };
    seed.driver.calls[0].args = vec!["buf".into(), "2".into()];

    let runner = FakeRunner::new(|_, call| Ok(if call == 1 { reached(7) } else { reached(SITE_LINE) }));
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(4, FakeBuilder::always_ok(), runner, Arc::new(UnavailableSynthesizer), store);

    let outcome = controller.run(seed).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Green);
    let first = &outcome.trace.records[0];
    assert_eq!(first.verdict, Verdict::WrongSite);
    assert_eq!(first.hit_location.as_ref().map(|l| l.line), Some(7));
    assert_eq!(first.refinement.as_ref().unwrap().applied, RefinementMove::RelocateInjection);

    let relocated = outcome.plan.input("n").unwrap();
    assert_eq!(relocated.injection, InjectionSite { function: "parse_record".into(), line: Some(SITE_LINE) });
    // Buffers stay in the driver.
    assert!(outcome.plan.input("buf").unwrap().injection.is_driver());
}

#[tokio::test]
async fn test_hit_on_another_line_moves_a_seed_driver_input_into_the_target() {
    let fx = Fixture::new();
    let runner = FakeRunner::new(|_, call| Ok(if call == 1 { reached(7) } else { reached(SITE_LINE) }));
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(4, FakeBuilder::always_ok(), runner.clone(), Arc::new(UnavailableSynthesizer), store);

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Green);
    assert_eq!(outcome.iterations(), 2);
    assert_eq!(runner.calls(), 2);
    let first = &outcome.trace.records[0];
    assert_eq!(first.verdict, Verdict::WrongSite);
    assert_eq!(first.refinement.as_ref().unwrap().applied, RefinementMove::RelocateInjection);

    let n = outcome.plan.input("n").unwrap();
    assert_eq!(n.injection, InjectionSite { function: "parse_record".into(), line: None });
    assert_eq!(outcome.plan.driver.calls[0].args, vec!["buf".to_string(), "0".to_string()]);
    assert!(outcome.plan.input("buf").unwrap().injection.is_driver());
    assert_eq!(outcome.plan.provenance.get("input:n"), Some(&1));
    assert_eq!(outcome.plan.provenance.get("driver"), Some(&1));
}

#[tokio::test]
async fn test_quiet_run_widens_a_stub_range() {
    let fx = Fixture::new();
    let mut seed = fx.seed();
    seed.stubs.insert("read_u16".into(), Stub {
        return_type: "int".into(),
        behavior: StubBehavior::Symbolic { min: Some(0), max: Some(16) },
    });

    let runner = FakeRunner::new(|_, call| Ok(if call == 1 { quiet() } else { reached(SITE_LINE) }));
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(4, FakeBuilder::always_ok(), runner, Arc::new(UnavailableSynthesizer), store);

    let outcome = controller.run(seed).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Green);
    let first = &outcome.trace.records[0];
    assert_eq!(first.verdict, Verdict::NoReproduction);
    assert!(first.cause.is_none());
    assert_eq!(first.refinement.as_ref().unwrap().applied, RefinementMove::WidenStubRange);
    assert_eq!(
        outcome.plan.stubs["read_u16"].behavior,
        StubBehavior::Symbolic { min: Some(0), max: Some(32) }
    );
}

#[tokio::test]
async fn test_hit_at_the_site_is_green_on_the_first_plan() {
    let fx = Fixture::new();
    let synthesizer = ScriptedSynthesizer::new(&[]);
    let runner = FakeRunner::new(|_, _| Ok(reached(SITE_LINE)));
    let store = Arc::new(PlanStore::in_memory());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = fx
        .controller(3, FakeBuilder::always_ok(), runner, synthesizer.clone(), store.clone())
        .with_event_channel(tx);

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Green);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.plan.version, 0);
    assert_eq!(outcome.iterations(), 1);
    let record = &outcome.trace.records[0];
    assert_eq!(record.outcome, Some(ExecutionOutcome::TargetAssertionReached));
    assert_eq!(record.counterexample.as_ref().unwrap().get("n").unwrap().int, Some(64));
    assert_eq!(synthesizer.calls(), 0);
    assert_eq!(store.versions(controller.lineage()), vec![0]);

    drop(controller);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(LoopEvent::IterationStarted { iteration: 1, plan_version: 0, .. })));
    assert!(matches!(events.last(), Some(LoopEvent::Finished { verdict: Verdict::Green, iterations: 1, .. })));
    assert!(!events.iter().any(|e| matches!(e, LoopEvent::StateChanged { state: LoopState::Refine, .. })));
}

#[tokio::test]
async fn test_timeouts_exhaust_the_budget_while_widening_it() {
    let fx = Fixture::new();
    let seen_budgets = Arc::new(Mutex::new(Vec::new()));
    let seen = seen_budgets.clone();
    let runner = FakeRunner::new(move |request, _| {
        seen.lock().unwrap().push(request.budget.time_secs);
        Ok(report(ExecutionOutcome::Timeout, vec![]))
    });
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(3, FakeBuilder::always_ok(), runner, Arc::new(UnavailableSynthesizer), store.clone());

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::BudgetExhausted);
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(outcome.trace.len(), 3);
    for record in &outcome.trace.records {
        assert_eq!(record.verdict, Verdict::NoReproduction);
        assert_eq!(record.cause, Some(ResourceCause::Timeout));
    }
    assert_eq!(
        outcome.trace.records[0].refinement.as_ref().unwrap().applied,
        RefinementMove::WidenExecutionBudget
    );
    assert!(outcome.trace.records[2].refinement.is_none());
    assert_eq!(*seen_budgets.lock().unwrap(), vec![120, 240, 480]);
    assert_eq!(store.versions(controller.lineage()), vec![0, 1, 2]);
    assert_eq!(outcome.plan.version, 2);
}

#[tokio::test]
async fn test_transient_runner_errors_are_retried_then_infra_error() {
    let fx = Fixture::new();
    let runner = FakeRunner::new(|_, _| Err(CegirError::Spawn("klee: not found".into())));
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(5, FakeBuilder::always_ok(), runner.clone(), Arc::new(UnavailableSynthesizer), store);

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::InfraError);
    assert_eq!(outcome.exit_code(), 4);
    assert_eq!(runner.calls(), 3);
    assert_eq!(outcome.trace.len(), 1);
    let record = &outcome.trace.records[0];
    assert_eq!(record.verdict, Verdict::InfraError);
    assert!(record.error.as_deref().unwrap().contains("klee: not found"));
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn test_rejected_synthesis_is_recorded_before_the_accepted_patch() {
    let fx = Fixture::new();
    let synthesizer = ScriptedSynthesizer::new(&[
        r#"{"assertion": {"line": 90, "text": "len <= 16"}}"#,
        "```json\n{\"assertion\": {\"line\": 9, \"text\": \"len < 16\"}}\n```",
    ]);
    let runner = FakeRunner::new(|_, call| Ok(if call == 1 { quiet() } else { reached(SITE_LINE) }));
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(4, FakeBuilder::always_ok(), runner, synthesizer.clone(), store);

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Green);
    assert_eq!(synthesizer.calls(), 2);
    let first = &outcome.trace.records[0];
    assert_eq!(first.rejected.len(), 1);
    assert_eq!(first.rejected[0].source, RefinementMove::Synthesized);
    assert!(first.rejected[0].reasons[0].contains("does not exist"));
    assert_eq!(first.refinement.as_ref().unwrap().applied, RefinementMove::Synthesized);
    assert_eq!(outcome.plan.assertion.as_ref().unwrap().text, "len < 16");
}

#[tokio::test]
async fn test_repeated_invalid_patches_end_in_infra_error() {
    let fx = Fixture::new();
    let synthesizer = ScriptedSynthesizer::new(&[]);
    let runner = FakeRunner::new(|_, _| Ok(quiet()));
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx.controller(6, FakeBuilder::always_ok(), runner, synthesizer.clone(), store.clone());

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::InfraError);
    assert_eq!(synthesizer.calls(), 3);
    let record = &outcome.trace.records[0];
    assert_eq!(record.verdict, Verdict::NoReproduction);
    assert_eq!(record.rejected.len(), 3);
    assert!(record.refinement.is_none());
    assert!(record.error.is_some());
    assert_eq!(store.versions(controller.lineage()), vec![0]);
}

#[tokio::test]
async fn test_cancelled_before_the_first_build() {
    let fx = Fixture::new();
    let builder = FakeBuilder::always_ok();
    let token = CancellationToken::new();
    token.cancel();
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx
        .controller(3, builder.clone(), FakeRunner::new(|_, _| Ok(quiet())), Arc::new(UnavailableSynthesizer), store.clone())
        .with_cancel_token(token);

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Cancelled);
    assert_eq!(outcome.exit_code(), 130);
    assert!(outcome.trace.records.is_empty());
    assert_eq!(builder.calls(), 0);
    assert_eq!(store.versions(controller.lineage()), vec![0]);
}

#[tokio::test]
async fn test_cancel_during_execution_stops_before_refinement() {
    let fx = Fixture::new();
    let builder = FakeBuilder::always_ok();
    let token = CancellationToken::new();
    let trigger = token.clone();
    let runner = FakeRunner::new(move |_, _| {
        trigger.cancel();
        Ok(quiet())
    });
    let store = Arc::new(PlanStore::in_memory());
    let controller = fx
        .controller(5, builder.clone(), runner, Arc::new(UnavailableSynthesizer), store.clone())
        .with_cancel_token(token);

    let outcome = controller.run(fx.seed()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Cancelled);
    assert_eq!(outcome.trace.len(), 1);
    assert!(outcome.trace.records[0].refinement.is_none());
    assert_eq!(builder.calls(), 1);
    assert_eq!(store.versions(controller.lineage()), vec![0]);
}

#[tokio::test]
async fn test_invalid_inputs_are_rejected_before_any_commit() {
    let fx = Fixture::new();
    let store = Arc::new(PlanStore::in_memory());

    let zero = fx.controller(0, FakeBuilder::always_ok(), FakeRunner::new(|_, _| Ok(quiet())), Arc::new(UnavailableSynthesizer), store.clone());
    let err = zero.run(fx.seed()).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);

    let controller = fx.controller(3, FakeBuilder::always_ok(), FakeRunner::new(|_, _| Ok(quiet())), Arc::new(UnavailableSynthesizer), store.clone());
    let mut bad_seed = fx.seed();
    bad_seed.driver.calls[0].function = "no_such_function".into();
    bad_seed.version = 1;
    assert!(matches!(controller.run(bad_seed).await, Err(CegirError::Input(_))));

    assert!(store.versions(controller.lineage()).is_empty());
}
