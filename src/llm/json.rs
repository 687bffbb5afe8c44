use serde_json::Value;
use crate::errors::CegirError;
use reqwest::StatusCode;
use crate::config::credentials::redact;

/// Pull a JSON object out of model output: the whole text, a ```json
/// fenced block, or the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Result<Value, CegirError> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(v);
    }
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            let json_str = rest[..end].trim();
            return serde_json::from_str(json_str)
                .map_err(|e| CegirError::PatchValidation(format!("Invalid JSON in code block: {}", e)));
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            let json_str = &text[start..=end];
            return serde_json::from_str(json_str)
                .map_err(|e| CegirError::PatchValidation(format!("Invalid JSON extraction: {}", e)));
        }
    }
    Err(CegirError::PatchValidation("No JSON object found in collaborator response".into()))
}

/// Map an HTTP error status from a provider to the error taxonomy. The
/// response body is quoted with `secret` masked.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str, secret: &str) -> CegirError {
    let snippet = redact(&crate::utils::truncation::truncate_error(body), secret);
    match status.as_u16() {
        429 => CegirError::RateLimit(format!("{} rate limit exceeded", provider)),
        401 | 403 => CegirError::Authentication(format!("{} rejected the API key", provider)),
        400 | 404 | 422 => CegirError::Config(format!("{} request rejected ({}): {}", provider, status, snippet)),
        _ => CegirError::LLMApi(format!("{} returned {}: {}", provider, status, snippet)),
    }
}
