//! Parsers for the symbolic engine's textual output: the stderr run summary,
//! per-test `.err` files and the test-case dump tool's listing.

use std::sync::LazyLock;
use regex::Regex;
use crate::harness::{TARGET_ERROR_SUFFIX, TARGET_MARKER};
use crate::models::{Counterexample, HitKind, InputValue, SiteHit, SourceLocation};

static COMPLETED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"KLEE: done: completed paths = (\d+)").expect("completed regex")
});
static PARTIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"KLEE: done: partially completed paths = (\d+)").expect("partial regex")
});
static INSTRUCTIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"KLEE: done: total instructions = (\d+)").expect("instructions regex")
});
static STACK_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\d+\s+in\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("stack frame regex")
});
static KTEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^object\s+(\d+):\s*(name|hex|int)\s*:\s*(.*)$").expect("ktest regex")
});

/// Run-level facts from the engine's stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub paths_explored: u64,
    pub instructions: u64,
    /// The engine's own wall-clock limit fired.
    pub halted_by_timer: bool,
    /// States were killed for memory or an instruction ceiling stopped the run.
    pub resource_exhausted: bool,
    /// The engine printed its final statistics.
    pub finished: bool,
}

pub fn parse_run_summary(stderr: &str) -> RunSummary {
    let number = |re: &Regex| -> Option<u64> {
        re.captures(stderr).and_then(|c| c[1].parse().ok())
    };
    let completed = number(&COMPLETED_RE);
    let partial = number(&PARTIAL_RE).unwrap_or(0);
    RunSummary {
        paths_explored: completed.unwrap_or(0) + partial,
        instructions: number(&INSTRUCTIONS_RE).unwrap_or(0),
        halted_by_timer: stderr.contains("HaltTimer invoked"),
        resource_exhausted: stderr.contains("over memory cap")
            || stderr.contains("exceeded memory cap")
            || stderr.contains("max-instructions exceeded")
            || stderr.contains("Memory limit exceeded"),
        finished: completed.is_some(),
    }
}

/// Fields of one `testNNNNNN.<kind>.err` file.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrFile {
    pub message: String,
    pub location: Option<SourceLocation>,
    pub function: Option<String>,
}

pub fn parse_err_file(content: &str) -> ErrFile {
    let mut message = String::new();
    let mut file = None;
    let mut line = None;
    let mut function = None;
    let mut in_stack = false;
    for raw in content.lines() {
        let text = raw.trim();
        if let Some(rest) = text.strip_prefix("Error:") {
            message = rest.trim().to_string();
        } else if let Some(rest) = text.strip_prefix("File:") {
            file = Some(rest.trim().to_string());
        } else if let Some(rest) = text.strip_prefix("Line:") {
            line = rest.trim().parse::<u32>().ok();
        } else if text.starts_with("Stack:") {
            in_stack = true;
        } else if in_stack && function.is_none() {
            if let Some(cap) = STACK_FRAME_RE.captures(text) {
                let name = &cap[1];
                // Frames inside the engine's own error helpers are not interesting.
                if !name.starts_with("klee_") {
                    function = Some(name.to_string());
                }
            }
        }
    }
    let location = match (file, line) {
        (Some(file), Some(line)) if !file.is_empty() => Some(SourceLocation::new(file, line)),
        _ => None,
    };
    ErrFile { message, location, function }
}

/// Build a hit from an error file, given its name suffix (`ptr.err`,
/// `assert.err`, the target check's suffix, ...).
pub fn hit_from_err(err: ErrFile, suffix: &str, counterexample: Counterexample) -> SiteHit {
    let is_target = suffix == TARGET_ERROR_SUFFIX || err.message.starts_with(TARGET_MARKER);
    let kind = if is_target || suffix == "assert.err" {
        HitKind::Assertion
    } else {
        HitKind::Crash
    };
    SiteHit {
        kind,
        location: err.location,
        function: err.function,
        message: err.message,
        is_target,
        counterexample,
    }
}

/// Split `test000003.ptr.err` into (`test000003`, `ptr.err`).
pub fn split_err_name(file_name: &str) -> Option<(&str, &str)> {
    let dot = file_name.find('.')?;
    let (test, suffix) = file_name.split_at(dot);
    let suffix = &suffix[1..];
    (test.starts_with("test") && suffix.ends_with(".err")).then_some((test, suffix))
}

/// Decode the test-case dump tool's listing into named input values.
pub fn parse_ktest_dump(output: &str) -> Counterexample {
    let mut values: Vec<InputValue> = Vec::new();
    let mut current: Option<usize> = None;
    for line in output.lines() {
        let Some(cap) = KTEST_RE.captures(line.trim()) else { continue };
        let Ok(index) = cap[1].parse::<usize>() else { continue };
        let field = &cap[2];
        let value = cap[3].trim();
        if field == "name" {
            values.push(InputValue {
                name: value.trim_matches(|c| c == '\'' || c == '"').trim_start_matches("b'").to_string(),
                hex: String::new(),
                int: None,
            });
            current = Some(index);
            continue;
        }
        if current != Some(index) {
            continue;
        }
        let Some(entry) = values.last_mut() else { continue };
        match field {
            "hex" => entry.hex = value.to_string(),
            "int" => entry.int = value.parse().ok(),
            _ => {}
        }
    }
    Counterexample { values }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STDERR: &str = "KLEE: output directory is \"/w/v0002/klee-out\"
KLEE: Using STP solver backend
KLEE: ERROR: src/parser.c:91: memory error: out of bound pointer
KLEE: NOTE: now ignoring this error at this location
KLEE: WARNING: killing 2 states (over memory cap: 2051MB)
KLEE: HaltTimer invoked
KLEE: halting execution, dumping remaining states

KLEE: done: total instructions = 181442
KLEE: done: completed paths = 12
KLEE: done: partially completed paths = 3
KLEE: done: generated tests = 14
";

    #[test]
    fn test_run_summary() {
        let summary = parse_run_summary(STDERR);
        assert_eq!(summary.paths_explored, 15);
        assert_eq!(summary.instructions, 181442);
        assert!(summary.halted_by_timer);
        assert!(summary.resource_exhausted);
        assert!(summary.finished);
    }

    #[test]
    fn test_unfinished_run() {
        let summary = parse_run_summary("KLEE: ERROR: Unable to load bitcode\n");
        assert!(!summary.finished);
        assert_eq!(summary.paths_explored, 0);
    }

    #[test]
    fn test_err_file_with_stack() {
        let content = "Error: memory error: out of bound pointer
File: /proj/src/parser.c
Line: 91
assembly.ll line: 330
State: 7
Stack:
\t#000000330 in copy_field (dst=94, src=95, n=96) at /proj/src/parser.c:91
\t#100000410 in parse_record (buf=..., len=...) at /proj/src/parser.c:120
\t#200000520 in main () at cegir_harness.c:14
";
        let err = parse_err_file(content);
        assert_eq!(err.message, "memory error: out of bound pointer");
        assert_eq!(err.location, Some(SourceLocation::new("/proj/src/parser.c", 91)));
        assert_eq!(err.function.as_deref(), Some("copy_field"));
        let hit = hit_from_err(err, "ptr.err", Counterexample::default());
        assert_eq!(hit.kind, HitKind::Crash);
        assert!(!hit.is_target);
    }

    #[test]
    fn test_target_check_err_file() {
        let content = "Error: cegir-target: n <= sizeof(field)
File: src/parser.c
Line: 88
Stack:
\t#000000100 in klee_report_error (...) at klee.c:1
\t#100000200 in parse_record (buf=1, len=2) at src/parser.c:88
";
        let hit = hit_from_err(parse_err_file(content), "cegir.err", Counterexample::default());
        assert!(hit.is_target);
        assert_eq!(hit.kind, HitKind::Assertion);
        assert_eq!(hit.function.as_deref(), Some("parse_record"));
        assert_eq!(hit.location, Some(SourceLocation::new("src/parser.c", 88)));
    }

    #[test]
    fn test_split_err_name() {
        assert_eq!(split_err_name("test000003.ptr.err"), Some(("test000003", "ptr.err")));
        assert_eq!(split_err_name("test000004.cegir.err"), Some(("test000004", "cegir.err")));
        assert_eq!(split_err_name("info"), None);
        assert_eq!(split_err_name("run.stats"), None);
    }

    #[test]
    fn test_ktest_dump() {
        let dump = "ktest file : 'klee-out/test000004.ktest'
args       : ['harness.bc']
num objects: 2
object 0: name: 'buf'
object 0: size: 4
object 0: data: b'\\x01\\x02AB'
object 0: hex : 0x01024142
object 0: int : 1111622145
object 0: text: ..AB
object 1: name: 'len'
object 1: size: 8
object 1: hex : 0x2100000000000000
object 1: int : 33
object 1: uint: 33
";
        let cex = parse_ktest_dump(dump);
        assert_eq!(cex.values.len(), 2);
        assert_eq!(cex.get("buf").unwrap().hex, "0x01024142");
        assert_eq!(cex.get("len").unwrap().int, Some(33));
    }
}
