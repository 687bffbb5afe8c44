use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::errors::CegirError;
use crate::llm::extract_json;
use crate::models::{
    Assertion, DriverCall, Plan, PlanField, SourceLocation, Stub, SymbolicInput, VulnerabilitySpec,
};

/// Part of a plan a synthesized patch is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchRegion {
    Assertion,
    /// Driver calls and symbolic inputs.
    Driver,
    Stubs,
    Full,
}

impl PatchRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assertion => "assertion",
            Self::Driver => "driver",
            Self::Stubs => "stubs",
            Self::Full => "full",
        }
    }

    pub fn permits(&self, other: PatchRegion) -> bool {
        *self == PatchRegion::Full || *self == other
    }

    /// Regions that differ between two plans. Budget changes are not a region
    /// a patch can express and are reported as `Full`.
    pub fn changed_between(before: &Plan, after: &Plan) -> Vec<PatchRegion> {
        let mut changed = Vec::new();
        if before.assertion != after.assertion {
            changed.push(PatchRegion::Assertion);
        }
        if before.driver != after.driver || before.symbolic_inputs != after.symbolic_inputs {
            changed.push(PatchRegion::Driver);
        }
        if before.stubs != after.stubs {
            changed.push(PatchRegion::Stubs);
        }
        if before.budget != after.budget {
            changed.push(PatchRegion::Full);
        }
        changed
    }

    /// JSON view of the region, shown to the collaborator.
    pub fn excerpt(&self, plan: &Plan) -> String {
        let value = match self {
            Self::Assertion => serde_json::json!({ "assertion": plan.assertion }),
            Self::Driver => serde_json::json!({
                "driver_calls": plan.driver.calls,
                "symbolic_inputs": plan.symbolic_inputs,
            }),
            Self::Stubs => serde_json::json!({ "stubs": plan.stubs }),
            Self::Full => serde_json::json!({
                "assertion": plan.assertion,
                "driver_calls": plan.driver.calls,
                "symbolic_inputs": plan.symbolic_inputs,
                "stubs": plan.stubs,
            }),
        };
        serde_json::to_string_pretty(&value).unwrap_or_default()
    }
}

impl std::fmt::Display for PatchRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssertionPatch {
    pub line: u32,
    pub text: String,
    /// Defaults to the spec's file.
    #[serde(default)]
    pub file: Option<String>,
}

/// Overlay produced by the synthesis collaborator. Absent keys leave the
/// plan unchanged; stubs and inputs merge by name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanPatch {
    #[serde(default)]
    pub assertion: Option<AssertionPatch>,
    #[serde(default)]
    pub stubs: Option<BTreeMap<String, Stub>>,
    #[serde(default)]
    pub remove_stubs: Vec<String>,
    #[serde(default)]
    pub symbolic_inputs: Option<Vec<SymbolicInput>>,
    #[serde(default)]
    pub driver_calls: Option<Vec<DriverCall>>,
}

/// Parse collaborator output leniently: raw JSON, a fenced block, or the
/// outermost brace span.
pub fn parse_patch(text: &str) -> Result<PlanPatch, CegirError> {
    let value = extract_json(text)?;
    if !value.is_object() {
        return Err(CegirError::PatchValidation("Patch must be a JSON object".into()));
    }
    serde_json::from_value(value)
        .map_err(|e| CegirError::PatchValidation(format!("Patch does not match the plan format: {}", e)))
}

impl PlanPatch {
    pub fn is_empty(&self) -> bool {
        self.assertion.is_none()
            && self.stubs.as_ref().map_or(true, |s| s.is_empty())
            && self.remove_stubs.is_empty()
            && self.symbolic_inputs.as_ref().map_or(true, |i| i.is_empty())
            && self.driver_calls.is_none()
    }

    /// Overlay onto the successor of `plan`, recording provenance for every
    /// field the patch sets.
    pub fn apply(&self, plan: &Plan, spec: &VulnerabilitySpec, iteration: u32) -> Plan {
        let mut next = plan.successor();

        if let Some(assertion) = &self.assertion {
            let file = assertion.file.clone().unwrap_or_else(|| spec.file.clone());
            next.assertion = Some(Assertion {
                location: SourceLocation::new(file, assertion.line),
                text: assertion.text.trim().to_string(),
            });
            next.touch(PlanField::Assertion, iteration);
        }

        for name in &self.remove_stubs {
            if next.stubs.remove(name).is_some() {
                next.provenance.remove(&PlanField::Stub(name.clone()).key());
            }
        }
        if let Some(stubs) = &self.stubs {
            for (name, stub) in stubs {
                next.stubs.insert(name.clone(), stub.clone());
                next.touch(PlanField::Stub(name.clone()), iteration);
            }
        }

        if let Some(inputs) = &self.symbolic_inputs {
            for input in inputs {
                match next.symbolic_inputs.iter_mut().find(|i| i.name == input.name) {
                    Some(existing) => *existing = input.clone(),
                    None => next.symbolic_inputs.push(input.clone()),
                }
                next.touch(PlanField::Input(input.name.clone()), iteration);
            }
        }

        if let Some(calls) = &self.driver_calls {
            next.driver.calls = calls.clone();
            next.touch(PlanField::Driver, iteration);
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionBudget, StubBehavior};
    use crate::models::spec::{BugClass, FactPack, Parameter};

    fn spec() -> VulnerabilitySpec {
        VulnerabilitySpec {
            id: "p-1".into(),
            file: "src/parser.c".into(),
            function: "parse_record".into(),
            line: 11,
            bug_class: BugClass::OutOfBoundsWrite,
            evidence: vec![],
            facts: FactPack {
                parameters: vec![
                    Parameter { name: "buf".into(), ty: "const char *".into() },
                    Parameter { name: "len".into(), ty: "size_t".into() },
                ],
                ..Default::default()
            },
            assertion_hint: None,
        }
    }

    #[test]
    fn test_parse_fenced_patch() {
        let text = "Here you go:\n```json\n{\"assertion\": {\"line\": 11, \"text\": \"len > 16\"}}\n```";
        let patch = parse_patch(text).unwrap();
        assert_eq!(patch.assertion.unwrap().text, "len > 16");
    }

    #[test]
    fn test_parse_rejects_unknown_keys_and_non_objects() {
        assert!(matches!(parse_patch(r#"{"shell": "rm -rf /"}"#), Err(CegirError::PatchValidation(_))));
        assert!(matches!(parse_patch("[1, 2]"), Err(CegirError::PatchValidation(_))));
    }

    #[test]
    fn test_apply_overlays_and_tracks_provenance() {
        let plan = Plan::seed(&spec(), ExecutionBudget::default());
        let patch = parse_patch(r#"{
            "assertion": {"line": 11, "text": " len > sizeof(field) "},
            "stubs": {"read_u16": {"behavior": {"kind": "symbolic", "min": 0}}},
            "symbolic_inputs": [{"name": "len", "type": "size_t", "max": 64, "injection": {"function": "main"}}]
        }"#).unwrap();
        let next = patch.apply(&plan, &spec(), 2);

        assert_eq!(next.version, 1);
        let assertion = next.assertion.as_ref().unwrap();
        assert_eq!(assertion.location, SourceLocation::new("src/parser.c", 11));
        assert_eq!(assertion.text, "len > sizeof(field)");
        assert_eq!(next.stubs["read_u16"].behavior, StubBehavior::Symbolic { min: Some(0), max: None });
        assert_eq!(next.symbolic_inputs.len(), 2);
        assert_eq!(next.input("len").unwrap().max, Some(64));
        assert_eq!(next.provenance["assertion"], 2);
        assert_eq!(next.provenance["stub:read_u16"], 2);
        assert_eq!(next.provenance["input:len"], 2);
        assert_eq!(next.provenance["input:buf"], 0);
        assert!(plan.assertion.is_none());
    }

    #[test]
    fn test_changed_regions() {
        let plan = Plan::seed(&spec(), ExecutionBudget::default());
        let patch = parse_patch(r#"{"remove_stubs": ["nothing"], "driver_calls": [{"function": "parse_record", "args": ["buf", "8"]}]}"#).unwrap();
        let next = patch.apply(&plan, &spec(), 1);
        assert_eq!(PatchRegion::changed_between(&plan, &next), vec![PatchRegion::Driver]);
        assert!(PatchRegion::Full.permits(PatchRegion::Driver));
        assert!(!PatchRegion::Assertion.permits(PatchRegion::Driver));
    }

    #[test]
    fn test_empty_patch() {
        assert!(parse_patch("{}").unwrap().is_empty());
        assert!(!parse_patch(r#"{"remove_stubs": ["x"]}"#).unwrap().is_empty());
    }
}
