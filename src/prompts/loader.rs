use std::path::PathBuf;
use std::sync::LazyLock;
use regex::{Captures, Regex};
use crate::errors::CegirError;
use tracing::debug;

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@include\(([^)]+)\)").expect("static regex"));
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{([A-Z_]+)\}\}").expect("static regex"));

/// Compiled-in templates; a prompts directory may override any of them.
const BUILTIN: &[(&str, &str)] = &[
    ("synthesis.txt", include_str!("../../prompts/synthesis.txt")),
    ("synthesis-system.txt", include_str!("../../prompts/synthesis-system.txt")),
    ("shared/_patch_format.txt", include_str!("../../prompts/shared/_patch_format.txt")),
    ("shared/_examples.txt", include_str!("../../prompts/shared/_examples.txt")),
];

/// Values for the `{{NAME}}` placeholders of the synthesis templates.
#[derive(Debug, Clone, Default)]
pub struct PromptVariables {
    pub spec_id: String,
    pub bug_class: String,
    pub bug_description: String,
    pub target_site: String,
    pub function: String,
    pub region: String,
    pub verdict: String,
    pub fact_pack: Option<String>,
    pub source_excerpt: Option<String>,
    pub plan_region: Option<String>,
    pub failure_diagnostic: Option<String>,
    pub rejection_reasons: Option<String>,
}

impl PromptVariables {
    /// `None` for names no template may use; optional values read as empty.
    fn lookup(&self, name: &str) -> Option<&str> {
        fn optional(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("")
        }
        Some(match name {
            "SPEC_ID" => &self.spec_id,
            "BUG_CLASS" => &self.bug_class,
            "BUG_DESCRIPTION" => &self.bug_description,
            "TARGET_SITE" => &self.target_site,
            "FUNCTION" => &self.function,
            "REGION" => &self.region,
            "VERDICT" => &self.verdict,
            "FACT_PACK" => optional(&self.fact_pack),
            "SOURCE_EXCERPT" => optional(&self.source_excerpt),
            "PLAN_REGION" => optional(&self.plan_region),
            "FAILURE_DIAGNOSTIC" => optional(&self.failure_diagnostic),
            "REJECTION_REASONS" => optional(&self.rejection_reasons),
            _ => return None,
        })
    }
}

/// Prompt templates with `@include(path)` directives, read from an optional
/// override directory and falling back to the compiled-in set.
pub struct PromptLoader {
    dir: Option<PathBuf>,
}

impl PromptLoader {
    pub fn new(dir: PathBuf) -> Self {
        debug!(dir = %dir.display(), "Prompt overrides enabled");
        Self { dir: Some(dir) }
    }

    pub fn builtin() -> Self {
        Self { dir: None }
    }

    /// Template `name` (no `.txt`) with every include expanded.
    pub fn load(&self, name: &str) -> Result<String, CegirError> {
        let mut chain = Vec::new();
        self.expand(&format!("{}.txt", name), &mut chain)
    }

    /// Substitute placeholders. An unknown name is an error so a typo in an
    /// override template cannot reach the collaborator verbatim.
    pub fn interpolate(&self, template: &str, vars: &PromptVariables) -> Result<String, CegirError> {
        let mut unknown = None;
        let text = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| match vars.lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => {
                unknown.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        });
        match unknown {
            Some(name) => Err(CegirError::Prompt(format!("Unknown placeholder {{{{{}}}}}", name))),
            None => Ok(text.into_owned()),
        }
    }

    /// `chain` holds the files currently being expanded, for cycle detection.
    fn expand(&self, rel: &str, chain: &mut Vec<String>) -> Result<String, CegirError> {
        if chain.iter().any(|open| open == rel) {
            chain.push(rel.to_string());
            return Err(CegirError::Prompt(format!("Include cycle: {}", chain.join(" -> "))));
        }
        let raw = self.read(rel)?;
        chain.push(rel.to_string());
        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in INCLUDE_RE.captures_iter(&raw) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            out.push_str(&raw[last..whole.start]);
            out.push_str(&self.expand(caps[1].trim(), chain)?);
            last = whole.end;
        }
        out.push_str(&raw[last..]);
        chain.pop();
        Ok(out)
    }

    fn read(&self, rel: &str) -> Result<String, CegirError> {
        if rel.split('/').any(|part| part == "..") {
            return Err(CegirError::Prompt(format!("Prompt path escapes the prompt root: {}", rel)));
        }
        if let Some(path) = self.dir.as_ref().map(|d| d.join(rel)).filter(|p| p.is_file()) {
            return std::fs::read_to_string(&path)
                .map_err(|e| CegirError::Prompt(format!("Cannot read {}: {}", path.display(), e)));
        }
        BUILTIN.iter()
            .find(|(name, _)| *name == rel)
            .map(|(_, text)| text.to_string())
            .ok_or_else(|| CegirError::Prompt(format!("No prompt named {}", rel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn overrides() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shared")).unwrap();
        fs::write(dir.path().join("shared/_site.txt"), "Site: {{TARGET_SITE}}").unwrap();
        fs::write(
            dir.path().join("nested.txt"),
            "<site>\n@include(shared/_site.txt)\n</site>\nFix {{REGION}} for {{SPEC_ID}}.",
        )
        .unwrap();
        fs::write(dir.path().join("a.txt"), "A @include(b.txt)").unwrap();
        fs::write(dir.path().join("b.txt"), "B @include(a.txt)").unwrap();
        dir
    }

    #[test]
    fn test_includes_are_expanded_in_place() {
        let dir = overrides();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let text = loader.load("nested").unwrap();
        assert_eq!(text, "<site>\nSite: {{TARGET_SITE}}\n</site>\nFix {{REGION}} for {{SPEC_ID}}.");
    }

    #[test]
    fn test_include_cycle_is_reported() {
        let dir = overrides();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let err = loader.load("a").unwrap_err().to_string();
        assert!(err.contains("a.txt -> b.txt -> a.txt"), "{}", err);
    }

    #[test]
    fn test_interpolate_fills_optional_with_empty() {
        let vars = PromptVariables {
            spec_id: "cve-1".to_string(),
            region: "assertion".to_string(),
            failure_diagnostic: Some("harness.c:3: error".to_string()),
            ..Default::default()
        };
        let text = PromptLoader::builtin()
            .interpolate("{{SPEC_ID}}/{{REGION}}: {{FAILURE_DIAGNOSTIC}} [{{REJECTION_REASONS}}]", &vars)
            .unwrap();
        assert_eq!(text, "cve-1/assertion: harness.c:3: error []");
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let err = PromptLoader::builtin()
            .interpolate("{{SPECID}}", &PromptVariables::default())
            .unwrap_err();
        assert!(matches!(err, CegirError::Prompt(_)));
    }

    #[test]
    fn test_builtin_templates_resolve() {
        let dir = overrides();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let system = loader.load("synthesis-system").unwrap();
        assert!(system.contains("Patch format"));
        assert!(!system.contains("@include"));
        let synthesis = PromptLoader::builtin().load("synthesis").unwrap();
        assert!(synthesis.contains("<examples>"));
        assert!(PromptLoader::builtin().interpolate(&synthesis, &PromptVariables::default()).is_ok());
    }

    #[test]
    fn test_missing_and_escaping_names() {
        let loader = PromptLoader::builtin();
        assert!(loader.load("nonexistent").is_err());
        assert!(loader.load("../secrets").is_err());
    }
}
