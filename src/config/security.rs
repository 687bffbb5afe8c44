use serde_yaml::Value;
use crate::errors::CegirError;

/// Reject config strings that could smuggle shell syntax into toolchain
/// command lines or point outside the intended directories.
pub fn validate_security_patterns(value: &Value) -> Result<(), CegirError> {
    walk(value, &mut String::new())
}

fn walk(value: &Value, at: &mut String) -> Result<(), CegirError> {
    match value {
        Value::String(s) => match hazard(s) {
            Some(reason) => Err(CegirError::Config(format!(
                "Dangerous pattern ({}) at config path: {}",
                reason,
                if at.is_empty() { "root" } else { at.as_str() }
            ))),
            None => Ok(()),
        },
        Value::Mapping(map) => {
            for (key, child) in map {
                let mark = at.len();
                if !at.is_empty() {
                    at.push('.');
                }
                at.push_str(key.as_str().unwrap_or("?"));
                walk(child, at)?;
                at.truncate(mark);
            }
            Ok(())
        }
        Value::Sequence(items) => {
            for (i, child) in items.iter().enumerate() {
                let mark = at.len();
                at.push_str(&format!("[{}]", i));
                walk(child, at)?;
                at.truncate(mark);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn hazard(s: &str) -> Option<&'static str> {
    if s.contains('\0') {
        Some("NUL byte")
    } else if s.contains("$(") || s.contains('`') {
        Some("command substitution")
    } else if s.split(['/', '\\', '=']).any(|segment| segment == "..") {
        Some("parent directory segment")
    } else if s.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("file:")) {
        Some("file URL")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str) -> Result<(), CegirError> {
        validate_security_patterns(&serde_yaml::from_str(text).unwrap())
    }

    #[test]
    fn test_ordinary_config_passes() {
        assert!(check("toolchain:\n  klee: /opt/klee/bin/klee\nllm:\n  api_key: $ANTHROPIC_API_KEY").is_ok());
        assert!(check("budget:\n  time_secs: 60\nbatch:\n  concurrency: 2").is_ok());
        assert!(check("output:\n  directory: runs/v1..v2").is_ok());
    }

    #[test]
    fn test_traversal_names_the_path() {
        let err = check("output:\n  directory: ../../etc").unwrap_err();
        assert!(err.to_string().contains("output.directory"));
    }

    #[test]
    fn test_command_substitution() {
        assert!(check("toolchain:\n  klee: 'klee$(id)'").is_err());
        assert!(check("toolchain:\n  klee: 'klee`id`'").is_err());
    }

    #[test]
    fn test_sequence_items_checked() {
        let err = check("toolchain:\n  klee_args:\n    - --optimize\n    - '--libc=../x'").unwrap_err();
        assert!(err.to_string().contains("toolchain.klee_args[1]"));
    }
}
