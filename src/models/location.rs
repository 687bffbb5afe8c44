use serde::{Deserialize, Serialize};

/// A file/line pair as reported by static analysis, the compiler, or the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self { file: file.into(), line }
    }

    /// Same line, and one path is a component-wise suffix of the other.
    /// The engine reports absolute paths while specs usually carry paths
    /// relative to the source root.
    pub fn same_site(&self, other: &SourceLocation) -> bool {
        self.line == other.line && paths_match(&self.file, &other.file)
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Compare two paths by their trailing components, ignoring `./` prefixes.
pub fn paths_match(a: &str, b: &str) -> bool {
    let a: Vec<&str> = components(a);
    let b: Vec<&str> = components(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    long.ends_with(short)
}

fn components(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_site_relative_and_absolute() {
        let spec = SourceLocation::new("src/parser.c", 120);
        let reported = SourceLocation::new("/work/lineage/src/parser.c", 120);
        assert!(spec.same_site(&reported));
        assert!(reported.same_site(&spec));
    }

    #[test]
    fn test_same_site_requires_same_line() {
        let spec = SourceLocation::new("src/parser.c", 120);
        assert!(!spec.same_site(&SourceLocation::new("src/parser.c", 121)));
    }

    #[test]
    fn test_paths_do_not_match_on_partial_component() {
        assert!(!paths_match("src/myparser.c", "parser.c"));
        assert!(paths_match("./parser.c", "parser.c"));
    }
}
