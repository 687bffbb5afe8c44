use std::collections::BTreeMap;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use crate::errors::CegirError;
use super::location::SourceLocation;
use super::spec::VulnerabilitySpec;

/// Name of the harness entry point; inputs injected here are declared in the driver.
pub const DRIVER_ENTRY: &str = "main";

/// Default harness file name inside a lineage work directory.
pub const DEFAULT_HARNESS_FILE: &str = "cegir_harness.c";

/// Array length used for pointer parameters when the fact pack gives no size.
pub const DEFAULT_BUFFER_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCall {
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl DriverCall {
    pub fn render(&self) -> String {
        format!("{}({});", self.function, self.args.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub path: PathBuf,
    pub calls: Vec<DriverCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StubBehavior {
    /// No side effects; returns zero.
    PassThrough,
    FixedValue { value: i64 },
    Symbolic {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
}

impl StubBehavior {
    pub fn label(&self) -> String {
        match self {
            Self::PassThrough => "pass-through".to_string(),
            Self::FixedValue { value } => format!("fixed({})", value),
            Self::Symbolic { min, max } => format!(
                "symbolic[{}..{}]",
                min.map(|v| v.to_string()).unwrap_or_default(),
                max.map(|v| v.to_string()).unwrap_or_default(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stub {
    #[serde(default = "default_return_type")]
    pub return_type: String,
    pub behavior: StubBehavior,
}

fn default_return_type() -> String {
    "long".to_string()
}

impl Stub {
    pub fn pass_through() -> Self {
        Self { return_type: default_return_type(), behavior: StubBehavior::PassThrough }
    }
}

/// Where a symbolic value is introduced: the driver entry, the entry of
/// another function, or immediately before a specific source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionSite {
    pub function: String,
    #[serde(default)]
    pub line: Option<u32>,
}

impl InjectionSite {
    pub fn driver() -> Self {
        Self { function: DRIVER_ENTRY.to_string(), line: None }
    }

    pub fn is_driver(&self) -> bool {
        self.function == DRIVER_ENTRY && self.line.is_none()
    }
}

impl std::fmt::Display for InjectionSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}@{}", self.function, line),
            None => write!(f, "{}", self.function),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicInput {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    /// Array length; `None` for scalars.
    #[serde(default)]
    pub len: Option<usize>,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    pub injection: InjectionSite,
}

impl SymbolicInput {
    pub fn declaration(&self) -> String {
        match self.len {
            Some(n) => format!("{} {}[{}];", self.ty, self.name, n),
            None => format!("{} {};", self.ty, self.name),
        }
    }

    pub fn is_ranged(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub location: SourceLocation,
    pub text: String,
}

/// Per-iteration execution budget. Carried in the plan so that widening it is
/// a refinement like any other and each iteration runs under a recorded budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBudget {
    pub time_secs: u64,
    pub max_memory_mb: u64,
    pub max_instructions: u64,
    pub build_timeout_secs: u64,
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self {
            time_secs: 120,
            max_memory_mb: 2048,
            max_instructions: 50_000_000,
            build_timeout_secs: 300,
        }
    }
}

impl ExecutionBudget {
    /// Double the execution limits, clamped to the ceiling. `None` once every
    /// limit already sits at its ceiling.
    pub fn widened(&self, ceiling: &ExecutionBudget) -> Option<ExecutionBudget> {
        let next = ExecutionBudget {
            time_secs: (self.time_secs.saturating_mul(2)).min(ceiling.time_secs).max(self.time_secs),
            max_memory_mb: (self.max_memory_mb.saturating_mul(2)).min(ceiling.max_memory_mb).max(self.max_memory_mb),
            max_instructions: (self.max_instructions.saturating_mul(2)).min(ceiling.max_instructions).max(self.max_instructions),
            build_timeout_secs: self.build_timeout_secs,
        };
        (next != *self).then_some(next)
    }

    pub fn widened_build(&self, ceiling: &ExecutionBudget) -> Option<ExecutionBudget> {
        let timeout = (self.build_timeout_secs.saturating_mul(2)).min(ceiling.build_timeout_secs);
        (timeout > self.build_timeout_secs).then(|| ExecutionBudget {
            build_timeout_secs: timeout,
            ..*self
        })
    }
}

/// Addressable plan field used as the provenance key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlanField {
    Driver,
    Stub(String),
    Input(String),
    Assertion,
    Budget,
}

impl PlanField {
    pub fn key(&self) -> String {
        match self {
            Self::Driver => "driver".to_string(),
            Self::Stub(name) => format!("stub:{}", name),
            Self::Input(name) => format!("input:{}", name),
            Self::Assertion => "assertion".to_string(),
            Self::Budget => "budget".to_string(),
        }
    }
}

/// Harness specification under refinement. A committed plan never changes;
/// refinement works on [`Plan::successor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub version: u32,
    pub driver: Driver,
    #[serde(default)]
    pub stubs: BTreeMap<String, Stub>,
    #[serde(default)]
    pub symbolic_inputs: Vec<SymbolicInput>,
    #[serde(default)]
    pub assertion: Option<Assertion>,
    #[serde(default)]
    pub budget: ExecutionBudget,
    /// Field key -> iteration that introduced or last modified it.
    #[serde(default)]
    pub provenance: BTreeMap<String, u32>,
}

impl Plan {
    /// Derive the version-0 seed from static-analysis facts.
    pub fn seed(spec: &VulnerabilitySpec, budget: ExecutionBudget) -> Self {
        let mut inputs = Vec::new();
        let mut args = Vec::new();
        for param in &spec.facts.parameters {
            let (ty, len) = match pointee(&param.ty) {
                Some(elem) => (elem, Some(DEFAULT_BUFFER_LEN)),
                None => (param.ty.trim().to_string(), None),
            };
            inputs.push(SymbolicInput {
                name: param.name.clone(),
                ty,
                len,
                min: None,
                max: None,
                injection: InjectionSite::driver(),
            });
            args.push(param.name.clone());
        }

        let assertion = spec.assertion_hint.as_ref().map(|hint| Assertion {
            location: spec.site(),
            text: hint.clone(),
        });

        let mut plan = Plan {
            version: 0,
            driver: Driver {
                path: PathBuf::from(DEFAULT_HARNESS_FILE),
                calls: vec![DriverCall { function: spec.function.clone(), args }],
            },
            stubs: BTreeMap::new(),
            symbolic_inputs: inputs,
            assertion,
            budget,
            provenance: BTreeMap::new(),
        };
        plan.touch(PlanField::Driver, 0);
        plan.touch(PlanField::Budget, 0);
        let names: Vec<String> = plan.symbolic_inputs.iter().map(|i| i.name.clone()).collect();
        for name in names {
            plan.touch(PlanField::Input(name), 0);
        }
        if plan.assertion.is_some() {
            plan.touch(PlanField::Assertion, 0);
        }
        plan
    }

    pub async fn load(path: &std::path::Path) -> Result<Self, CegirError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CegirError::Input(format!("Cannot read plan {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CegirError::Input(format!("Malformed plan {}: {}", path.display(), e))
        })
    }

    /// A mutable copy numbered as the next version.
    pub fn successor(&self) -> Plan {
        let mut next = self.clone();
        next.version = self.version + 1;
        next
    }

    pub fn touch(&mut self, field: PlanField, iteration: u32) {
        self.provenance.insert(field.key(), iteration);
    }

    pub fn input(&self, name: &str) -> Option<&SymbolicInput> {
        self.symbolic_inputs.iter().find(|i| i.name == name)
    }

    /// Structural equality on everything that affects the generated harness.
    pub fn same_harness(&self, other: &Plan) -> bool {
        self.driver == other.driver
            && self.stubs == other.stubs
            && self.symbolic_inputs == other.symbolic_inputs
            && self.assertion == other.assertion
            && self.budget == other.budget
    }

    /// Input-level checks applied to a seed plan before the loop starts.
    pub fn validate_structure(&self) -> Result<(), CegirError> {
        if self.driver.calls.is_empty() {
            return Err(CegirError::Input("Plan driver must perform at least one call".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for input in &self.symbolic_inputs {
            if !is_identifier(&input.name) {
                return Err(CegirError::Input(format!("Invalid symbolic input name '{}'", input.name)));
            }
            if !seen.insert(input.name.as_str()) {
                return Err(CegirError::Input(format!("Duplicate symbolic input '{}'", input.name)));
            }
            if let (Some(min), Some(max)) = (input.min, input.max) {
                if min > max {
                    return Err(CegirError::Input(format!(
                        "Symbolic input '{}' has empty range [{}, {}]", input.name, min, max
                    )));
                }
            }
        }
        for name in self.stubs.keys() {
            if !is_identifier(name) {
                return Err(CegirError::Input(format!("Invalid stub symbol '{}'", name)));
            }
        }
        if let Some(assertion) = &self.assertion {
            if assertion.text.trim().is_empty() || assertion.location.line == 0 {
                return Err(CegirError::Input("Assertion needs text and a line >= 1".into()));
            }
        }
        Ok(())
    }
}

/// Element type of a pointer parameter, `None` for non-pointers.
fn pointee(ty: &str) -> Option<String> {
    let trimmed = ty.trim();
    let base = trimmed.strip_suffix('*')?.trim();
    let base = base.strip_prefix("const ").unwrap_or(base).trim();
    let base = base.strip_suffix("const").unwrap_or(base).trim();
    if base == "void" {
        Some("unsigned char".to_string())
    } else {
        Some(base.to_string())
    }
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::spec::{BugClass, FactPack, Parameter};

    fn spec() -> VulnerabilitySpec {
        VulnerabilitySpec {
            id: "t1".into(),
            file: "src/buf.c".into(),
            function: "copy_field".into(),
            line: 42,
            bug_class: BugClass::OutOfBoundsWrite,
            evidence: vec![],
            facts: FactPack {
                parameters: vec![
                    Parameter { name: "dst".into(), ty: "char *".into() },
                    Parameter { name: "src".into(), ty: "const void *".into() },
                    Parameter { name: "n".into(), ty: "size_t".into() },
                ],
                ..Default::default()
            },
            assertion_hint: Some("n <= 16".into()),
        }
    }

    #[test]
    fn test_seed_derives_inputs_from_parameters() {
        let plan = Plan::seed(&spec(), ExecutionBudget::default());
        assert_eq!(plan.version, 0);
        assert_eq!(plan.symbolic_inputs.len(), 3);
        assert_eq!(plan.symbolic_inputs[0].ty, "char");
        assert_eq!(plan.symbolic_inputs[0].len, Some(DEFAULT_BUFFER_LEN));
        assert_eq!(plan.symbolic_inputs[1].ty, "unsigned char");
        assert_eq!(plan.symbolic_inputs[2].len, None);
        assert_eq!(plan.driver.calls[0].render(), "copy_field(dst, src, n);");
        assert_eq!(plan.assertion.as_ref().unwrap().location.line, 42);
        assert_eq!(plan.provenance.get("input:n"), Some(&0));
        assert!(plan.validate_structure().is_ok());
    }

    #[test]
    fn test_successor_bumps_version_without_touching_original() {
        let plan = Plan::seed(&spec(), ExecutionBudget::default());
        let mut next = plan.successor();
        next.stubs.insert("read_header".into(), Stub::pass_through());
        next.touch(PlanField::Stub("read_header".into()), 1);
        assert_eq!(next.version, 1);
        assert!(plan.stubs.is_empty());
        assert!(!plan.same_harness(&next));
    }

    #[test]
    fn test_budget_widening_respects_ceiling() {
        let budget = ExecutionBudget { time_secs: 60, max_memory_mb: 1024, max_instructions: 10, build_timeout_secs: 30 };
        let ceiling = ExecutionBudget { time_secs: 100, max_memory_mb: 1024, max_instructions: 40, build_timeout_secs: 30 };
        let wider = budget.widened(&ceiling).unwrap();
        assert_eq!(wider.time_secs, 100);
        assert_eq!(wider.max_memory_mb, 1024);
        assert_eq!(wider.max_instructions, 20);
        let capped = ExecutionBudget { max_instructions: 40, ..wider };
        assert!(capped.widened(&ceiling).is_none());
        assert!(budget.widened_build(&ceiling).is_none());
    }

    #[test]
    fn test_duplicate_inputs_rejected() {
        let mut plan = Plan::seed(&spec(), ExecutionBudget::default());
        let dup = plan.symbolic_inputs[2].clone();
        plan.symbolic_inputs.push(dup);
        assert!(plan.validate_structure().is_err());
    }

    #[test]
    fn test_stub_behavior_serialization() {
        let stub: Stub = serde_json::from_str(r#"{"behavior": {"kind": "symbolic", "max": 8}}"#).unwrap();
        assert_eq!(stub.return_type, "long");
        assert_eq!(stub.behavior, StubBehavior::Symbolic { min: None, max: Some(8) });
    }
}
