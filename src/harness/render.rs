use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::errors::CegirError;
use crate::models::{Plan, Stub, StubBehavior, SymbolicInput, VulnerabilitySpec, DRIVER_ENTRY};
use super::source_index::SourceIndex;

/// Message prefix of the injected target check; hits carrying it are target hits.
pub const TARGET_MARKER: &str = "cegir-target";

/// Error-file suffix the engine uses for the injected check (`*.cegir.err`).
pub const TARGET_ERROR_SUFFIX: &str = "cegir.err";

pub const STUBS_FILE: &str = "cegir_stubs.c";

const INSTRUMENTED_DIR: &str = "src";

const PRELUDE: &str = "#include <stddef.h>
#include <stdint.h>
void klee_make_symbolic(void *addr, size_t nbytes, const char *name);
void klee_assume(uintptr_t condition);
void klee_report_error(const char *file, int line, const char *message, const char *suffix);
";

/// Where harness files for each plan version are written.
#[derive(Debug, Clone)]
pub struct HarnessLayout {
    pub source_root: PathBuf,
    pub work_root: PathBuf,
}

impl HarnessLayout {
    pub fn new(source_root: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self { source_root: source_root.into(), work_root: work_root.into() }
    }

    pub fn version_dir(&self, version: u32) -> PathBuf {
        self.work_root.join(format!("v{:04}", version))
    }
}

/// Generated sources for one plan version.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessBundle {
    pub version: u32,
    pub harness_path: PathBuf,
    pub harness_source: String,
    pub stubs_path: Option<PathBuf>,
    pub stubs_source: Option<String>,
    /// Relative source path -> instrumented contents (line numbers preserved).
    pub instrumented: BTreeMap<String, String>,
    /// Translation unit that the harness `#include`s; never compiled on its own.
    pub target_unit: String,
    /// Original directories of instrumented files, for quoted includes.
    pub quote_dirs: Vec<PathBuf>,
}

impl HarnessBundle {
    /// Path the build should compile for a relative source: the instrumented
    /// copy when one exists, the original otherwise.
    pub fn source_path(&self, layout: &HarnessLayout, rel: &str) -> PathBuf {
        if self.instrumented.contains_key(rel) {
            instrumented_path(layout, self.version, rel)
        } else {
            layout.source_root.join(rel)
        }
    }

    pub async fn write(&self, layout: &HarnessLayout) -> Result<(), CegirError> {
        let dir = layout.version_dir(self.version);
        tokio::fs::create_dir_all(&dir).await?;
        write_file(&self.harness_path, &self.harness_source).await?;
        if let (Some(path), Some(source)) = (&self.stubs_path, &self.stubs_source) {
            write_file(path, source).await?;
        }
        for (rel, content) in &self.instrumented {
            write_file(&instrumented_path(layout, self.version, rel), content).await?;
        }
        Ok(())
    }
}

async fn write_file(path: &Path, content: &str) -> Result<(), CegirError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

fn instrumented_path(layout: &HarnessLayout, version: u32, rel: &str) -> PathBuf {
    layout.version_dir(version).join(INSTRUMENTED_DIR).join(rel)
}

enum Edit {
    /// Code placed before the existing text of a line.
    Prefix(String),
    /// Code placed right after the first `{` of a line.
    AfterBrace(String),
}

/// Turn a plan into harness sources. Pure: reads only the index.
///
/// All inserted code stays on the line it instruments, so the engine reports
/// the same file:line coordinates as the untouched source.
pub fn render(
    plan: &Plan,
    spec: &VulnerabilitySpec,
    index: &SourceIndex,
    layout: &HarnessLayout,
) -> Result<HarnessBundle, CegirError> {
    let target_unit = index.find_file(&spec.file)
        .ok_or_else(|| CegirError::PatchValidation(format!(
            "Target file {} is not in the source tree", spec.file
        )))?
        .rel_path
        .clone();

    let mut edits: BTreeMap<String, BTreeMap<u32, Vec<Edit>>> = BTreeMap::new();
    let mut driver_inputs = Vec::new();

    for input in &plan.symbolic_inputs {
        if input.injection.function == DRIVER_ENTRY {
            driver_inputs.push(input);
            continue;
        }
        let entry = index.function_entry(&input.injection.function).ok_or_else(|| {
            CegirError::PatchValidation(format!(
                "Injection function '{}' for input '{}' is not defined in the source tree",
                input.injection.function, input.name
            ))
        })?;
        let file = index.find_file(&entry.file)
            .map(|f| f.rel_path.clone())
            .unwrap_or_else(|| entry.file.clone());
        let code = symbolize(input, "");
        let edit = match input.injection.line {
            Some(line) => (line, Edit::Prefix(code)),
            None => (entry.line, Edit::AfterBrace(code)),
        };
        edits.entry(file).or_default().entry(edit.0).or_default().push(edit.1);
    }

    if let Some(assertion) = &plan.assertion {
        let file = index.find_file(&assertion.location.file)
            .ok_or_else(|| CegirError::PatchValidation(format!(
                "Assertion file {} is not in the source tree", assertion.location.file
            )))?
            .rel_path
            .clone();
        let condition = one_line(&assertion.text);
        let check = format!(
            "if (!({})) klee_report_error(__FILE__, __LINE__, \"{}: {}\", \"{}\");",
            condition, TARGET_MARKER, c_escape(&condition), TARGET_ERROR_SUFFIX
        );
        edits.entry(file).or_default()
            .entry(assertion.location.line).or_default()
            .push(Edit::Prefix(check));
    }

    let mut instrumented = BTreeMap::new();
    let mut quote_dirs = Vec::new();
    for (rel, file_edits) in &edits {
        let source = index.find_file(rel).ok_or_else(|| {
            CegirError::PatchValidation(format!("{} is not in the source tree", rel))
        })?;
        let mut out = String::with_capacity(PRELUDE.len() + source.lines.len() * 40);
        out.push_str(PRELUDE);
        out.push_str(&format!("#line 1 \"{}\"\n", c_escape(rel)));
        for (i, line) in source.lines.iter().enumerate() {
            let number = i as u32 + 1;
            match file_edits.get(&number) {
                Some(line_edits) => out.push_str(&apply_edits(line, line_edits, rel, number)?),
                None => out.push_str(line),
            }
            out.push('\n');
        }
        if let Some(max) = file_edits.keys().next_back() {
            if *max as usize > source.lines.len() {
                return Err(CegirError::PatchValidation(format!(
                    "{}:{} is past the end of the file", rel, max
                )));
            }
        }
        let dir = layout.source_root.join(rel);
        if let Some(parent) = dir.parent() {
            if !quote_dirs.contains(&parent.to_path_buf()) {
                quote_dirs.push(parent.to_path_buf());
            }
        }
        instrumented.insert(rel.clone(), out);
    }

    let version_dir = layout.version_dir(plan.version);
    let unit_path = if instrumented.contains_key(&target_unit) {
        instrumented_path(layout, plan.version, &target_unit)
    } else {
        layout.source_root.join(&target_unit)
    };

    let harness_source = render_driver(plan, spec, index, &driver_inputs, &unit_path);
    let (stubs_path, stubs_source) = if plan.stubs.is_empty() {
        (None, None)
    } else {
        (Some(version_dir.join(STUBS_FILE)), Some(render_stubs(plan)))
    };

    Ok(HarnessBundle {
        version: plan.version,
        harness_path: version_dir.join(&plan.driver.path),
        harness_source,
        stubs_path,
        stubs_source,
        instrumented,
        target_unit,
        quote_dirs,
    })
}

fn apply_edits(line: &str, edits: &[Edit], rel: &str, number: u32) -> Result<String, CegirError> {
    let mut body = line.to_string();
    let after_brace: Vec<&str> = edits.iter()
        .filter_map(|e| match e { Edit::AfterBrace(code) => Some(code.as_str()), _ => None })
        .collect();
    if !after_brace.is_empty() {
        let pos = body.find('{').ok_or_else(|| CegirError::PatchValidation(format!(
            "{}:{} has no opening brace to inject after", rel, number
        )))?;
        body.insert_str(pos + 1, &format!(" {}", after_brace.join(" ")));
    }
    let prefixes: Vec<&str> = edits.iter()
        .filter_map(|e| match e { Edit::Prefix(code) => Some(code.as_str()), _ => None })
        .collect();
    if prefixes.is_empty() {
        Ok(body)
    } else {
        Ok(format!("{} {}", prefixes.join(" "), body))
    }
}

fn render_driver(
    plan: &Plan,
    spec: &VulnerabilitySpec,
    index: &SourceIndex,
    inputs: &[&SymbolicInput],
    unit_path: &Path,
) -> String {
    let mut out = format!("/* cegir harness for {} (plan v{}) */\n", spec.id, plan.version);
    out.push_str(PRELUDE);
    out.push('\n');

    let undeclared: Vec<(&String, &Stub)> = plan.stubs.iter()
        .filter(|(name, _)| !index.is_declared(name))
        .collect();
    for (name, stub) in undeclared {
        out.push_str(&format!("{} {}();\n", stub.return_type, name));
    }

    out.push_str("#define main cegir_target_main\n");
    out.push_str(&format!("#include \"{}\"\n", c_escape(&unit_path.to_string_lossy())));
    out.push_str("#undef main\n\n");

    out.push_str("int main(void) {\n");
    for input in inputs {
        out.push_str(&format!("    {}\n", input.declaration()));
        out.push_str(&format!("    {}\n", symbolize(input, "    ")));
    }
    for call in &plan.driver.calls {
        out.push_str(&format!("    {}\n", call.render()));
    }
    out.push_str("    return 0;\n}\n");
    out
}

fn render_stubs(plan: &Plan) -> String {
    let mut out = String::from("/* cegir stubs */\n");
    out.push_str(PRELUDE);
    for (name, stub) in &plan.stubs {
        out.push('\n');
        let ret = stub.return_type.trim();
        if ret == "void" {
            out.push_str(&format!("void {}() {{\n}}\n", name));
            continue;
        }
        match &stub.behavior {
            StubBehavior::PassThrough => {
                out.push_str(&format!("{} {}() {{\n    return ({})0;\n}}\n", ret, name, ret));
            }
            StubBehavior::FixedValue { value } => {
                out.push_str(&format!("{} {}() {{\n    return ({}){};\n}}\n", ret, name, ret, value));
            }
            StubBehavior::Symbolic { min, max } => {
                out.push_str(&format!("{} {}() {{\n", ret, name));
                out.push_str(&format!("    {} cegir_ret;\n", ret));
                out.push_str(&format!(
                    "    klee_make_symbolic(&cegir_ret, sizeof(cegir_ret), \"{}.ret\");\n", name
                ));
                if let Some(min) = min {
                    out.push_str(&format!("    klee_assume((long long)cegir_ret >= {}LL);\n", min));
                }
                if let Some(max) = max {
                    out.push_str(&format!("    klee_assume((long long)cegir_ret <= {}LL);\n", max));
                }
                out.push_str("    return cegir_ret;\n}\n");
            }
        }
    }
    out
}

/// Single-line `klee_make_symbolic` call plus range assumptions.
fn symbolize(input: &SymbolicInput, indent: &str) -> String {
    let name = &input.name;
    let mut parts = Vec::new();
    match input.len {
        Some(n) => {
            parts.push(format!(
                "klee_make_symbolic({}, {} * sizeof({}[0]), \"{}\");", name, n, name, name
            ));
            if input.is_ranged() {
                let mut bounds = Vec::new();
                if let Some(min) = input.min {
                    bounds.push(format!("(long long){}[cegir_i] >= {}LL", name, min));
                }
                if let Some(max) = input.max {
                    bounds.push(format!("(long long){}[cegir_i] <= {}LL", name, max));
                }
                parts.push(format!(
                    "for (size_t cegir_i = 0; cegir_i < {}; cegir_i++) klee_assume({});",
                    n, bounds.join(" && ")
                ));
            }
        }
        None => {
            parts.push(format!("klee_make_symbolic(&{}, sizeof({}), \"{}\");", name, name, name));
            if let Some(min) = input.min {
                parts.push(format!("klee_assume((long long){} >= {}LL);", name, min));
            }
            if let Some(max) = input.max {
                parts.push(format!("klee_assume((long long){} <= {}LL);", name, max));
            }
        }
    }
    let sep = if indent.is_empty() { " ".to_string() } else { format!("\n{}", indent) };
    parts.join(&sep)
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn c_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
