use std::collections::HashSet;
use crate::harness::{render, HarnessLayout, SourceIndex};
use crate::models::{is_identifier, Plan, StubBehavior, VulnerabilitySpec, DRIVER_ENTRY};
use super::patch::PatchRegion;

/// Everything a candidate is checked against before it may be committed.
pub struct ValidationContext<'a> {
    pub current: &'a Plan,
    pub spec: &'a VulnerabilitySpec,
    pub index: &'a SourceIndex,
    pub layout: &'a HarnessLayout,
    /// Set for synthesized candidates that may only touch one region.
    pub region: Option<PatchRegion>,
}

/// Structural checks on a proposed plan. Returns the rejection reasons;
/// an empty list means the candidate is acceptable.
pub fn validate_candidate(candidate: &Plan, ctx: &ValidationContext<'_>) -> Vec<String> {
    let mut reasons = Vec::new();

    if candidate.same_harness(ctx.current) {
        reasons.push("candidate is identical to the current plan".to_string());
        return reasons;
    }
    if candidate.version != ctx.current.version + 1 {
        reasons.push(format!(
            "candidate version {} does not follow {}", candidate.version, ctx.current.version
        ));
    }

    if let Some(region) = ctx.region {
        for changed in PatchRegion::changed_between(ctx.current, candidate) {
            if !region.permits(changed) {
                reasons.push(format!("patch may only change the {} region, but changed {}", region, changed));
            }
        }
    }

    check_stubs(candidate, ctx, &mut reasons);
    check_inputs(candidate, ctx, &mut reasons);
    check_driver(candidate, ctx, &mut reasons);

    if let Some(assertion) = &candidate.assertion {
        if assertion.text.trim().is_empty() {
            reasons.push("assertion text is empty".to_string());
        }
        if !ctx.index.line_exists(&assertion.location) {
            reasons.push(format!("assertion location {} does not exist in the source tree", assertion.location));
        }
    }

    // Only worth rendering once the references are known to resolve.
    if reasons.is_empty() {
        if let Err(e) = render(candidate, ctx.spec, ctx.index, ctx.layout) {
            reasons.push(format!("harness does not render: {}", e));
        }
    }

    reasons
}

fn check_stubs(candidate: &Plan, ctx: &ValidationContext<'_>, reasons: &mut Vec<String>) {
    for (name, stub) in &candidate.stubs {
        if !is_identifier(name) {
            reasons.push(format!("stub name '{}' is not a C identifier", name));
            continue;
        }
        let called = candidate.driver.calls.iter().any(|c| &c.function == name);
        if !ctx.index.resolves(name) && !called {
            reasons.push(format!("stub '{}' does not resolve in the driver or source tree", name));
        }
        if ctx.index.is_defined(name) && !ctx.current.stubs.contains_key(name) {
            reasons.push(format!("stub '{}' would duplicate a function defined in the source tree", name));
        }
        if stub.return_type.trim() == "void" && stub.behavior != StubBehavior::PassThrough {
            reasons.push(format!("void stub '{}' cannot return a value", name));
        }
        if let StubBehavior::Symbolic { min: Some(min), max: Some(max) } = stub.behavior {
            if min > max {
                reasons.push(format!("stub '{}' has an empty range [{}, {}]", name, min, max));
            }
        }
    }
}

fn check_inputs(candidate: &Plan, ctx: &ValidationContext<'_>, reasons: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for input in &candidate.symbolic_inputs {
        if !is_identifier(&input.name) {
            reasons.push(format!("symbolic input name '{}' is not a C identifier", input.name));
        }
        if !seen.insert(input.name.as_str()) {
            reasons.push(format!("symbolic input '{}' is declared twice", input.name));
        }
        if input.len == Some(0) {
            reasons.push(format!("symbolic input '{}' has zero length", input.name));
        }
        if let (Some(min), Some(max)) = (input.min, input.max) {
            if min > max {
                reasons.push(format!("symbolic input '{}' has an empty range [{}, {}]", input.name, min, max));
            }
        }

        let site = &input.injection;
        if site.function == DRIVER_ENTRY {
            if site.line.is_some() {
                reasons.push(format!("input '{}' cannot target a line of the driver entry", input.name));
            }
            continue;
        }
        match ctx.index.function_entry(&site.function) {
            None => reasons.push(format!(
                "injection function '{}' for input '{}' is not defined in the source tree",
                site.function, input.name
            )),
            Some(entry) => {
                if let Some(line) = site.line {
                    let at = crate::models::SourceLocation::new(entry.file.clone(), line);
                    if line <= entry.line || !ctx.index.line_exists(&at) {
                        reasons.push(format!(
                            "injection line {} is not inside the body of '{}'", line, site.function
                        ));
                    }
                }
            }
        }
    }
}

fn check_driver(candidate: &Plan, ctx: &ValidationContext<'_>, reasons: &mut Vec<String>) {
    if candidate.driver.calls.is_empty() {
        reasons.push("driver performs no calls".to_string());
    }
    for call in &candidate.driver.calls {
        if !is_identifier(&call.function) {
            reasons.push(format!("driver call target '{}' is not a C identifier", call.function));
        } else if !ctx.index.resolves(&call.function) && !candidate.stubs.contains_key(&call.function) {
            reasons.push(format!("driver calls unknown function '{}'", call.function));
        }
        for arg in &call.args {
            if arg.contains(';') || arg.contains('{') || arg.contains('}') {
                reasons.push(format!("driver argument '{}' is not a single expression", arg));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::spec::{BugClass, FactPack, Parameter};
    use crate::models::{Assertion, ExecutionBudget, InjectionSite, SourceLocation, Stub, SymbolicInput};

    const PARSER_C: &str = "#include <string.h>\n\
size_t field_len(const char *p);\n\
\n\
int parse_record(const char *buf, size_t len) {\n\
    char field[16];\n\
    size_t n = field_len(buf);\n\
    memcpy(field, buf, n);\n\
    return field[0];\n\
}\n";

    fn spec() -> VulnerabilitySpec {
        VulnerabilitySpec {
            id: "v-1".into(),
            file: "src/parser.c".into(),
            function: "parse_record".into(),
            line: 7,
            bug_class: BugClass::OutOfBoundsWrite,
            evidence: vec![],
            facts: FactPack {
                parameters: vec![
                    Parameter { name: "buf".into(), ty: "const char *".into() },
                    Parameter { name: "len".into(), ty: "size_t".into() },
                ],
                ..Default::default()
            },
            assertion_hint: Some("n <= sizeof(field)".into()),
        }
    }

    fn fixture() -> (SourceIndex, HarnessLayout, Plan) {
        let index = SourceIndex::from_sources(vec![("src/parser.c", PARSER_C)]);
        let layout = HarnessLayout::new("/src", "/work");
        let plan = Plan::seed(&spec(), ExecutionBudget::default());
        (index, layout, plan)
    }

    fn check(candidate: &Plan, current: &Plan, index: &SourceIndex, layout: &HarnessLayout, region: Option<PatchRegion>) -> Vec<String> {
        let spec = spec();
        let ctx = ValidationContext { current, spec: &spec, index, layout, region };
        validate_candidate(candidate, &ctx)
    }

    #[test]
    fn test_accepts_resolving_stub() {
        let (index, layout, plan) = fixture();
        let mut next = plan.successor();
        next.stubs.insert("field_len".into(), Stub {
            return_type: "size_t".into(),
            behavior: StubBehavior::Symbolic { min: Some(0), max: Some(64) },
        });
        assert!(check(&next, &plan, &index, &layout, None).is_empty());
    }

    #[test]
    fn test_rejects_unresolved_stub_and_identical_plan() {
        let (index, layout, plan) = fixture();
        let mut next = plan.successor();
        next.stubs.insert("xmlFree".into(), Stub::pass_through());
        let reasons = check(&next, &plan, &index, &layout, None);
        assert!(reasons.iter().any(|r| r.contains("xmlFree")));

        let same = plan.successor();
        let reasons = check(&same, &plan, &index, &layout, None);
        assert_eq!(reasons, vec!["candidate is identical to the current plan".to_string()]);
    }

    #[test]
    fn test_rejects_missing_assertion_location() {
        let (index, layout, plan) = fixture();
        let mut next = plan.successor();
        next.assertion = Some(Assertion { location: SourceLocation::new("src/parser.c", 40), text: "n > 16".into() });
        let reasons = check(&next, &plan, &index, &layout, Some(PatchRegion::Assertion));
        assert!(reasons.iter().any(|r| r.contains("does not exist")));
    }

    #[test]
    fn test_rejects_duplicate_inputs_and_bad_injection() {
        let (index, layout, plan) = fixture();
        let mut next = plan.successor();
        next.symbolic_inputs.push(SymbolicInput {
            name: "len".into(),
            ty: "size_t".into(),
            len: None,
            min: None,
            max: None,
            injection: InjectionSite { function: "parse_record".into(), line: Some(2) },
        });
        let reasons = check(&next, &plan, &index, &layout, None);
        assert!(reasons.iter().any(|r| r.contains("declared twice")));
        assert!(reasons.iter().any(|r| r.contains("not inside the body")));
    }

    #[test]
    fn test_region_constraint_enforced() {
        let (index, layout, plan) = fixture();
        let mut next = plan.successor();
        next.stubs.insert("field_len".into(), Stub::pass_through());
        let reasons = check(&next, &plan, &index, &layout, Some(PatchRegion::Assertion));
        assert!(reasons.iter().any(|r| r.contains("only change the assertion region")));
    }

    #[test]
    fn test_rejects_stub_shadowing_defined_function() {
        let (index, layout, plan) = fixture();
        let mut next = plan.successor();
        next.stubs.insert("parse_record".into(), Stub::pass_through());
        let reasons = check(&next, &plan, &index, &layout, None);
        assert!(reasons.iter().any(|r| r.contains("duplicate a function")));
    }

    #[test]
    fn test_rejects_void_stub_with_value() {
        let (index, layout, plan) = fixture();
        let mut next = plan.successor();
        next.stubs.insert("field_len".into(), Stub {
            return_type: "void".into(),
            behavior: StubBehavior::FixedValue { value: 3 },
        });
        let reasons = check(&next, &plan, &index, &layout, None);
        assert!(reasons.iter().any(|r| r.contains("void stub")));
    }
}
