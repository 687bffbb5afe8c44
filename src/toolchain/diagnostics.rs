use std::sync::LazyLock;
use regex::Regex;
use crate::models::{BuildFailure, SourceLocation};

static MISSING_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"undefined reference to [`']([A-Za-z_][A-Za-z0-9_]*)'",
        r"undefined symbol: _?([A-Za-z_][A-Za-z0-9_]*)",
        r"call to undeclared function '([A-Za-z_][A-Za-z0-9_]*)'",
        r"implicit declaration of function '([A-Za-z_][A-Za-z0-9_]*)'",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("missing-symbol regex"))
    .collect()
});

static DUPLICATE_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"multiple definition of [`']([A-Za-z_][A-Za-z0-9_]*)'",
        r"duplicate symbol: _?([A-Za-z_][A-Za-z0-9_]*)",
        r"Linking globals named '([A-Za-z_][A-Za-z0-9_]*)': symbol multiply defined",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("duplicate-symbol regex"))
    .collect()
});

static ERROR_LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(.+?):(\d+):(?:\d+:)?\s*(?:fatal )?error:").expect("error location regex")
});

static LINK_FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)linker command failed|ld returned|llvm-link: error|error: linking").expect("link regex")
});

/// Map raw compiler/linker output of a failed build to a failure reason.
/// Order: timeout, duplicate definitions, missing symbols, any located
/// compile error, generic link failure, unlocated syntax error.
pub fn classify_build_failure(output: &str, timed_out: bool) -> BuildFailure {
    if timed_out {
        return BuildFailure::Timeout;
    }

    let duplicates = collect(&DUPLICATE_RE, output);
    if !duplicates.is_empty() {
        return BuildFailure::Link { duplicates };
    }

    let symbols = collect(&MISSING_RE, output);
    if !symbols.is_empty() {
        return BuildFailure::MissingSymbol { symbols };
    }

    if let Some(location) = first_error_location(output) {
        return BuildFailure::Syntax { location: Some(location) };
    }

    if LINK_FAILURE_RE.is_match(output) {
        return BuildFailure::Link { duplicates: Vec::new() };
    }

    BuildFailure::Syntax { location: None }
}

pub fn first_error_location(output: &str) -> Option<SourceLocation> {
    let cap = ERROR_LOCATION_RE.captures(output)?;
    let line = cap[2].parse().ok()?;
    Some(SourceLocation::new(cap[1].trim(), line))
}

fn collect(patterns: &[Regex], output: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for re in patterns {
        for cap in re.captures_iter(output) {
            let symbol = cap[1].to_string();
            if !found.contains(&symbol) {
                found.push(symbol);
            }
        }
    }
    found
}

/// Functions the engine's runtime (its intrinsics plus the bundled libc)
/// resolves at load time.
const RUNTIME_SYMBOLS: &[&str] = &[
    "abort", "atoi", "atol", "calloc", "exit", "fclose", "fflush", "fgets", "fopen",
    "fprintf", "fputs", "fread", "free", "fwrite", "getenv", "isalnum", "isalpha",
    "isdigit", "isspace", "malloc", "memchr", "memcmp", "memcpy", "memmove", "memset",
    "printf", "putchar", "puts", "realloc", "snprintf", "sprintf", "strcat", "strchr",
    "strcmp", "strcpy", "strdup", "strlen", "strncat", "strncmp", "strncpy", "strrchr",
    "strstr", "strtol", "strtoul", "tolower", "toupper", "vfprintf", "vsnprintf",
];

const RUNTIME_PREFIXES: &[&str] = &["klee_", "llvm.", "__"];

/// Undefined symbols from an `llvm-nm --undefined-only` listing of the
/// linked artifact, minus those the engine runtime provides.
pub fn unresolved_symbols(listing: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() || line.ends_with(':') {
            continue;
        }
        let Some(symbol) = line.split_whitespace().last() else { continue };
        if RUNTIME_SYMBOLS.contains(&symbol)
            || RUNTIME_PREFIXES.iter().any(|p| symbol.starts_with(p))
            || found.iter().any(|s| s == symbol)
        {
            continue;
        }
        found.push(symbol.to_string());
    }
    found
}
