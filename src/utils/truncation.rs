const MAX_OUTPUT_LENGTH: usize = 15_000;
const MAX_ERROR_LENGTH: usize = 2_000;

/// Keep the head and tail of long tool output (diagnostics, engine logs).
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_LENGTH {
        output.to_string()
    } else {
        let half = MAX_OUTPUT_LENGTH / 2;
        let start = &output[..floor_boundary(output, half)];
        let end = &output[ceil_boundary(output, output.len() - half)..];
        format!("{}\n\n... [truncated {} chars] ...\n\n{}", start, output.len() - start.len() - end.len(), end)
    }
}

pub fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LENGTH {
        error.to_string()
    } else {
        format!("{}...", &error[..floor_boundary(error, MAX_ERROR_LENGTH)])
    }
}

/// Last `max` bytes of `text`, for log excerpts.
pub fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        text
    } else {
        &text[ceil_boundary(text, text.len() - max)..]
    }
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_untouched() {
        assert_eq!(truncate_output("ok"), "ok");
        assert_eq!(truncate_error("ok"), "ok");
    }

    #[test]
    fn test_long_output_keeps_head_and_tail() {
        let text = format!("HEAD{}TAIL", "x".repeat(20_000));
        let out = truncate_output(&text);
        assert!(out.starts_with("HEAD"));
        assert!(out.ends_with("TAIL"));
        assert!(out.contains("[truncated"));
    }

    #[test]
    fn test_multibyte_boundaries_do_not_panic() {
        let text = "‘’".repeat(5_000);
        let out = truncate_output(&text);
        assert!(out.len() < text.len());
        let err = truncate_error(&text);
        assert!(err.ends_with("..."));
        assert!(tail(&text, 7).len() <= 7);
    }
}
