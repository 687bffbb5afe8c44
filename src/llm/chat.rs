use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::CegirError;
use super::json::status_error;
use super::provider::LLMProvider;
use super::types::{Completion, LLMResponse, TokenUsage};
use tracing::debug;

/// Servers speaking the OpenAI chat-completions format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFlavor {
    OpenAI,
    /// Self-hosted endpoint (Ollama, llama.cpp, vLLM); no key required.
    Local,
}

impl ChatFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Local => "local",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Local => "http://localhost:11434/v1",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Local => "qwen2.5-coder:7b",
        }
    }

    // Local models run on whatever hardware is at hand.
    fn timeout(&self) -> Duration {
        match self {
            Self::OpenAI => Duration::from_secs(300),
            Self::Local => Duration::from_secs(600),
        }
    }
}

pub struct ChatCompletionsProvider {
    client: Client,
    flavor: ChatFlavor,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl ChatCompletionsProvider {
    pub fn new(flavor: ChatFlavor, api_key: &str, model: Option<&str>, base_url: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            flavor,
            api_key: (!api_key.is_empty()).then(|| api_key.to_string()),
            model: model.unwrap_or(flavor.default_model()).to_string(),
            base_url: base_url.unwrap_or(flavor.default_base_url()).trim_end_matches('/').to_string(),
        }
    }

    fn body(&self, request: &Completion<'_>) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }
}

fn parse_choice(data: &Value) -> Result<(String, Option<TokenUsage>), CegirError> {
    if let Some(error) = data.get("error") {
        return Err(CegirError::LLMApi(error["message"].as_str().unwrap_or("unknown error").to_string()));
    }
    let content = data["choices"][0]["message"]["content"].as_str()
        .ok_or_else(|| CegirError::LLMApi("No message content in chat completion".into()))?
        .to_string();
    let usage = match (data["usage"]["prompt_tokens"].as_u64(), data["usage"]["completion_tokens"].as_u64()) {
        (Some(input), Some(output)) => Some(TokenUsage { input, output }),
        _ => None,
    };
    Ok((content, usage))
}

#[async_trait]
impl LLMProvider for ChatCompletionsProvider {
    async fn complete(&self, request: &Completion<'_>) -> Result<LLMResponse, CegirError> {
        let mut builder = self.client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.flavor.timeout())
            .json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let label = self.flavor.name();
        let resp = builder.send().await
            .map_err(|e| CegirError::Network(format!("{} request failed: {}", label, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(label, status, &text, self.api_key.as_deref().unwrap_or_default()));
        }
        let data: Value = resp.json().await
            .map_err(|e| CegirError::LLMApi(format!("Failed to parse {} response: {}", label, e)))?;

        let (content, usage) = parse_choice(&data)?;
        debug!(provider = label, model = %self.model, ?usage, "Chat completion");
        Ok(LLMResponse::metered(content, &self.model, usage, None))
    }

    fn provider_name(&self) -> &str { self.flavor.name() }
    fn model_name(&self) -> &str { &self.model }
}
