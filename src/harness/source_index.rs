use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use regex::Regex;
use std::sync::LazyLock;
use crate::errors::CegirError;
use crate::models::location::{paths_match, SourceLocation};
use tracing::{debug, warn};

const SOURCE_PATTERNS: &[&str] = &["**/*.c", "**/*.h", "**/*.cc", "**/*.cpp", "**/*.cxx", "**/*.hpp"];
const MAX_SOURCE_BYTES: u64 = 4 * 1024 * 1024;

const NOT_FUNCTIONS: &[&str] = &["if", "while", "for", "switch", "return", "sizeof", "do", "else"];

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("identifier regex")
});

// name, then a parameter list that may span lines and nest one level of
// parentheses, then the opening brace of the body.
static FUNCTION_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\((?:[^;{}()]|\([^()]*\))*\)\s*\{")
        .expect("function definition regex")
});

static PROTOTYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_][A-Za-z0-9_ \t\*]*?)[\s\*]([A-Za-z_][A-Za-z0-9_]*)\s*\((?:[^;{}()]|\([^()]*\))*\)\s*;")
        .expect("prototype regex")
});

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the source root, `/`-separated.
    pub rel_path: String,
    pub lines: Vec<String>,
}

/// Identifiers, files and function definitions of a target source tree.
/// Used to validate that proposed stubs, assertions and injection sites
/// refer to things that exist.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    root: PathBuf,
    files: Vec<SourceFile>,
    identifiers: HashSet<String>,
    /// Function name -> line holding the opening brace of its body.
    functions: HashMap<String, SourceLocation>,
    /// Functions with a prototype somewhere in the tree.
    declared: HashSet<String>,
}

impl SourceIndex {
    pub fn scan(root: &Path) -> Result<Self, CegirError> {
        let mut sources = Vec::new();
        let mut seen = HashSet::new();
        for pattern in SOURCE_PATTERNS {
            let full = root.join(pattern).to_string_lossy().to_string();
            let entries = glob::glob(&full)
                .map_err(|e| CegirError::Input(format!("Bad source pattern {}: {}", full, e)))?;
            for path in entries.filter_map(Result::ok) {
                if !seen.insert(path.clone()) {
                    continue;
                }
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if size > MAX_SOURCE_BYTES {
                    warn!(path = %path.display(), size, "Skipping oversized source file");
                    continue;
                }
                // Tolerate non-UTF-8 sources: they still have identifiers.
                let bytes = std::fs::read(&path)?;
                let text = String::from_utf8_lossy(&bytes).to_string();
                let rel = path.strip_prefix(root).unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                sources.push((rel, text));
            }
        }
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        let mut index = Self::from_sources(sources);
        index.root = root.to_path_buf();
        debug!(root = %root.display(), files = index.files.len(), functions = index.functions.len(), "Source tree indexed");
        Ok(index)
    }

    /// Build an index from in-memory (relative path, contents) pairs.
    pub fn from_sources<I, P, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: Into<String>,
        S: AsRef<str>,
    {
        let mut index = SourceIndex::default();
        for (rel, text) in sources {
            let rel: String = rel.into();
            let text = text.as_ref();
            for m in IDENT_RE.find_iter(text) {
                index.identifiers.insert(m.as_str().to_string());
            }
            for cap in FUNCTION_DEF_RE.captures_iter(text) {
                let name = &cap[1];
                if NOT_FUNCTIONS.contains(&name) {
                    continue;
                }
                let Some(whole) = cap.get(0) else { continue };
                let brace_offset = whole.end() - 1;
                let line = text[..brace_offset].matches('\n').count() as u32 + 1;
                index.functions
                    .entry(name.to_string())
                    .or_insert_with(|| SourceLocation::new(rel.clone(), line));
            }
            for cap in PROTOTYPE_RE.captures_iter(text) {
                let leading = cap[1].split_whitespace().next().unwrap_or_default();
                if NOT_FUNCTIONS.contains(&leading) {
                    continue;
                }
                index.declared.insert(cap[2].to_string());
            }
            index.files.push(SourceFile {
                rel_path: rel,
                lines: text.lines().map(str::to_string).collect(),
            });
        }
        index
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// The symbol appears somewhere in the tree (definition, declaration or use).
    pub fn resolves(&self, symbol: &str) -> bool {
        self.identifiers.contains(symbol)
    }

    pub fn is_defined(&self, function: &str) -> bool {
        self.functions.contains_key(function)
    }

    /// Defined or declared, so a call compiles without an implicit declaration.
    pub fn is_declared(&self, function: &str) -> bool {
        self.declared.contains(function) || self.functions.contains_key(function)
    }

    pub fn find_file(&self, file: &str) -> Option<&SourceFile> {
        self.files.iter()
            .find(|f| f.rel_path == file)
            .or_else(|| self.files.iter().find(|f| paths_match(&f.rel_path, file)))
    }

    pub fn line_exists(&self, location: &SourceLocation) -> bool {
        location.line >= 1
            && self.find_file(&location.file)
                .map(|f| location.line as usize <= f.lines.len())
                .unwrap_or(false)
    }

    pub fn function_entry(&self, function: &str) -> Option<&SourceLocation> {
        self.functions.get(function)
    }

    pub fn line_text(&self, location: &SourceLocation) -> Option<&str> {
        let file = self.find_file(&location.file)?;
        let idx = (location.line as usize).checked_sub(1)?;
        file.lines.get(idx).map(String::as_str)
    }

    /// Numbered lines around `location`, for prompts and reports.
    pub fn excerpt(&self, location: &SourceLocation, radius: u32) -> Option<String> {
        let file = self.find_file(&location.file)?;
        if location.line == 0 || location.line as usize > file.lines.len() {
            return None;
        }
        let first = location.line.saturating_sub(radius).max(1);
        let last = (location.line + radius).min(file.lines.len() as u32);
        let mut out = String::new();
        for number in first..=last {
            let marker = if number == location.line { ">" } else { " " };
            out.push_str(&format!("{}{:5} | {}\n", marker, number, file.lines[number as usize - 1]));
        }
        Some(out)
    }

    /// Function whose body most closely precedes `location` in the same file.
    pub fn enclosing_function(&self, location: &SourceLocation) -> Option<&str> {
        self.functions.iter()
            .filter(|(_, entry)| paths_match(&entry.file, &location.file) && entry.line <= location.line)
            .max_by_key(|(_, entry)| entry.line)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARSER_C: &str = "#include \"util.h\"\n\
static int read_u16(const unsigned char *p)\n\
{\n\
    return p[0] | (p[1] << 8);\n\
}\n\
\n\
int parse_record(const char *buf,\n\
                 size_t len) {\n\
    char field[16];\n\
    if (len > 0) {\n\
        memcpy(field, buf, len);\n\
    }\n\
    return read_u16((const unsigned char *)field);\n\
}\n";

    fn index() -> SourceIndex {
        SourceIndex::from_sources(vec![("src/parser.c", PARSER_C)])
    }

    #[test]
    fn test_function_entries_found_including_multiline_params() {
        let index = index();
        assert_eq!(index.function_entry("read_u16").unwrap().line, 3);
        assert_eq!(index.function_entry("parse_record").unwrap().line, 8);
        assert!(index.function_entry("if").is_none());
    }

    #[test]
    fn test_resolves_identifiers() {
        let index = index();
        assert!(index.resolves("memcpy"));
        assert!(index.resolves("parse_record"));
        assert!(!index.resolves("xmlFree"));
    }

    #[test]
    fn test_prototypes_distinguished_from_calls() {
        let index = SourceIndex::from_sources(vec![(
            "util.h",
            "extern size_t read_header(const char *p, int flags);\nstatic inline char *dup(const char *);\n",
        ), (
            "main.c",
            "int run(void) {\n    return consume(buf);\n    log_line(\"x\");\n}\n",
        )]);
        assert!(index.is_declared("read_header"));
        assert!(index.is_declared("dup"));
        assert!(index.is_declared("run"));
        assert!(!index.is_declared("consume"));
        assert!(!index.is_declared("log_line"));
        assert!(index.resolves("log_line"));
    }

    #[test]
    fn test_line_exists_with_suffix_match() {
        let index = index();
        assert!(index.line_exists(&SourceLocation::new("parser.c", 11)));
        assert!(index.line_exists(&SourceLocation::new("/abs/project/src/parser.c", 14)));
        assert!(!index.line_exists(&SourceLocation::new("src/parser.c", 99)));
        assert!(!index.line_exists(&SourceLocation::new("src/lexer.c", 1)));
    }

    #[test]
    fn test_enclosing_function() {
        let index = index();
        assert_eq!(index.enclosing_function(&SourceLocation::new("src/parser.c", 11)), Some("parse_record"));
        assert_eq!(index.enclosing_function(&SourceLocation::new("src/parser.c", 4)), Some("read_u16"));
    }

    #[test]
    fn test_excerpt_marks_the_line() {
        let index = index();
        let text = index.excerpt(&SourceLocation::new("src/parser.c", 11), 1).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with(">   11 |"));
        assert_eq!(index.line_text(&SourceLocation::new("parser.c", 9)), Some("    char field[16];"));
        assert!(index.excerpt(&SourceLocation::new("src/parser.c", 0), 2).is_none());
    }

    #[test]
    fn test_scan_reads_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/parser.c"), PARSER_C).unwrap();
        std::fs::write(dir.path().join("README"), "parse_nothing").unwrap();
        let index = SourceIndex::scan(dir.path()).unwrap();
        assert_eq!(index.files().len(), 1);
        assert_eq!(index.files()[0].rel_path, "src/parser.c");
        assert!(!index.resolves("parse_nothing"));
    }
}
