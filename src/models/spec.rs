use serde::{Deserialize, Serialize};
use crate::errors::CegirError;
use super::location::SourceLocation;

/// Memory-safety bug class claimed by static analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugClass {
    OutOfBoundsRead,
    OutOfBoundsWrite,
    LengthMisuse,
    UseAfterFree,
    DoubleFree,
    NullDereference,
    IntegerOverflow,
}

impl BugClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfBoundsRead => "out_of_bounds_read",
            Self::OutOfBoundsWrite => "out_of_bounds_write",
            Self::LengthMisuse => "length_misuse",
            Self::UseAfterFree => "use_after_free",
            Self::DoubleFree => "double_free",
            Self::NullDereference => "null_dereference",
            Self::IntegerOverflow => "integer_overflow",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::OutOfBoundsRead => "read past the end of a buffer",
            Self::OutOfBoundsWrite => "write past the end of a buffer",
            Self::LengthMisuse => "out-of-bounds access caused by a length/size value that does not match the buffer",
            Self::UseAfterFree => "access to heap memory after it was freed",
            Self::DoubleFree => "heap memory freed twice",
            Self::NullDereference => "dereference of a null pointer",
            Self::IntegerOverflow => "arithmetic overflow feeding a size or index",
        }
    }
}

impl std::fmt::Display for BugClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub message: String,
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Static-analysis facts that accompany a finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactPack {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub callees: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Immutable hypothesis about where and how a memory-safety bug manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilitySpec {
    pub id: String,
    pub file: String,
    pub function: String,
    pub line: u32,
    pub bug_class: BugClass,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub facts: FactPack,
    #[serde(default)]
    pub assertion_hint: Option<String>,
}

impl VulnerabilitySpec {
    pub fn site(&self) -> SourceLocation {
        SourceLocation::new(self.file.clone(), self.line)
    }

    pub async fn load(path: &std::path::Path) -> Result<Self, CegirError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CegirError::Input(format!("Cannot read spec {}: {}", path.display(), e))
        })?;
        let spec: VulnerabilitySpec = serde_json::from_str(&content).map_err(|e| {
            CegirError::Input(format!("Malformed spec {}: {}", path.display(), e))
        })?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), CegirError> {
        if self.id.trim().is_empty() {
            return Err(CegirError::Input("Spec id must not be empty".into()));
        }
        if self.file.trim().is_empty() {
            return Err(CegirError::Input(format!("Spec {}: target file must not be empty", self.id)));
        }
        if self.function.trim().is_empty() {
            return Err(CegirError::Input(format!("Spec {}: target function must not be empty", self.id)));
        }
        if self.line == 0 {
            return Err(CegirError::Input(format!("Spec {}: line numbers start at 1", self.id)));
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.facts.parameters {
            if !seen.insert(p.name.as_str()) {
                return Err(CegirError::Input(format!(
                    "Spec {}: duplicate parameter '{}' in fact pack", self.id, p.name
                )));
            }
        }
        Ok(())
    }

    /// Render the evidence and fact pack as plain text for prompts and reports.
    pub fn fact_pack_text(&self) -> String {
        let mut out = String::new();
        for (i, e) in self.evidence.iter().enumerate() {
            match &e.location {
                Some(loc) => out.push_str(&format!("{}. [{}] {}\n", i + 1, loc, e.message)),
                None => out.push_str(&format!("{}. {}\n", i + 1, e.message)),
            }
        }
        if !self.facts.parameters.is_empty() {
            let params: Vec<String> = self.facts.parameters.iter()
                .map(|p| format!("{} {}", p.ty, p.name))
                .collect();
            out.push_str(&format!("Parameters of {}: {}\n", self.function, params.join(", ")));
        }
        if !self.facts.callees.is_empty() {
            out.push_str(&format!("Callees: {}\n", self.facts.callees.join(", ")));
        }
        for note in &self.facts.notes {
            out.push_str(&format!("Note: {}\n", note));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VulnerabilitySpec {
        serde_json::from_value(serde_json::json!({
            "id": "arvo-66502",
            "file": "src/parser.c",
            "function": "parse_record",
            "line": 88,
            "bug_class": "length_misuse",
            "evidence": [
                {"message": "memcpy length derived from header field", "location": {"file": "src/parser.c", "line": 85}}
            ],
            "facts": {"parameters": [{"name": "buf", "type": "const char *"}, {"name": "len", "type": "size_t"}]}
        })).unwrap()
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec = sample();
        assert_eq!(spec.bug_class, BugClass::LengthMisuse);
        assert!(spec.assertion_hint.is_none());
        assert_eq!(spec.site(), SourceLocation::new("src/parser.c", 88));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_zero_line_rejected() {
        let mut spec = sample();
        spec.line = 0;
        assert!(matches!(spec.validate(), Err(CegirError::Input(_))));
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let mut spec = sample();
        spec.facts.parameters.push(Parameter { name: "len".into(), ty: "int".into() });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_fact_pack_text_lists_evidence_and_parameters() {
        let text = sample().fact_pack_text();
        assert!(text.contains("[src/parser.c:85] memcpy length"));
        assert!(text.contains("size_t len"));
    }
}
