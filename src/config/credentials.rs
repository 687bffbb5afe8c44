//! API key lookup for the synthesis collaborator.

use tracing::debug;

/// Expand an `llm.api_key` value. `$NAME` and `${NAME}` read the environment;
/// anything else is taken literally. An unset variable yields `None`.
pub fn resolve_credential(value: &str) -> Option<String> {
    let reference = value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .or_else(|| value.strip_prefix('$'));
    let Some(name) = reference else {
        return Some(value.to_string());
    };
    match std::env::var(name) {
        Ok(resolved) if !resolved.is_empty() => {
            debug!(var = %name, "API key taken from environment");
            Some(resolved)
        }
        _ => {
            debug!(var = %name, "API key variable unset");
            None
        }
    }
}

/// Conventional environment variable for a hosted provider's key.
pub fn provider_key_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        _ => None,
    }
}

/// Mask `secret` inside provider error text. Short values are left alone.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.len() < 8 {
        return text.to_string();
    }
    text.replace(secret, "[REDACTED]")
}
