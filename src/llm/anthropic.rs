use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::CegirError;
use super::json::status_error;
use super::provider::LLMProvider;
use super::types::{Completion, LLMResponse, Pricing, TokenUsage};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";

/// Sonnet-tier list prices.
const SONNET_PRICING: Pricing = Pricing { input: 3.0, output: 15.0 };

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: Option<&str>, base_url: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: base_url.unwrap_or("https://api.anthropic.com").trim_end_matches('/').to_string(),
        }
    }

    fn body(&self, request: &Completion<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = request.system {
            body["system"] = json!(system);
        }
        body
    }

    fn pricing(&self) -> Option<Pricing> {
        self.model.contains("sonnet").then_some(SONNET_PRICING)
    }
}

/// Text blocks of a Messages API reply, concatenated, plus token usage.
fn parse_messages(data: &Value) -> Result<(String, Option<TokenUsage>), CegirError> {
    if let Some(error) = data.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        if message.contains("billing") || message.contains("quota") {
            return Err(CegirError::Authentication(format!("Anthropic account: {}", message)));
        }
        return Err(CegirError::LLMApi(message.to_string()));
    }
    let blocks = data["content"].as_array()
        .ok_or_else(|| CegirError::LLMApi("No content in Anthropic response".into()))?;
    let text: String = blocks.iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    if text.is_empty() {
        return Err(CegirError::LLMApi("Anthropic response holds no text block".into()));
    }
    let usage = match (data["usage"]["input_tokens"].as_u64(), data["usage"]["output_tokens"].as_u64()) {
        (Some(input), Some(output)) => Some(TokenUsage { input, output }),
        _ => None,
    };
    Ok((text, usage))
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, request: &Completion<'_>) -> Result<LLMResponse, CegirError> {
        let resp = self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(REQUEST_TIMEOUT)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| CegirError::Network(format!("Anthropic API request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error("Anthropic", status, &text, &self.api_key));
        }
        let data: Value = resp.json().await
            .map_err(|e| CegirError::LLMApi(format!("Failed to parse Anthropic response: {}", e)))?;

        let (content, usage) = parse_messages(&data)?;
        debug!(model = %self.model, ?usage, "Anthropic completion");
        Ok(LLMResponse::metered(content, &self.model, usage, self.pricing()))
    }

    fn provider_name(&self) -> &str { "anthropic" }
    fn model_name(&self) -> &str { &self.model }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_carries_system_and_limits() {
        let provider = AnthropicProvider::new("k", None, None);
        let body = provider.body(&Completion::new("fix it").system("be terse").limits(512, 0.0));
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["content"], "fix it");
    }

    #[test]
    fn test_parse_joins_text_blocks() {
        let data = json!({
            "content": [
                {"type": "text", "text": "{\"assertion\":"},
                {"type": "text", "text": " null}"}
            ],
            "usage": {"input_tokens": 1000, "output_tokens": 200}
        });
        let (text, usage) = parse_messages(&data).unwrap();
        assert_eq!(text, "{\"assertion\": null}");
        assert_eq!(usage, Some(TokenUsage { input: 1000, output: 200 }));
        assert!((SONNET_PRICING.cost(usage.unwrap()) - 0.006).abs() < 1e-9);
    }

    #[test]
    fn test_quota_error_is_not_retryable() {
        let data = json!({"error": {"message": "credit balance too low for billing"}});
        let err = parse_messages(&data).unwrap_err();
        assert!(!err.classify().retryable);
    }
}
