use crate::config::credentials::{provider_key_var, resolve_credential};
use crate::config::LLMConfig;
use crate::errors::CegirError;
use super::provider::LLMProvider;
use super::anthropic::AnthropicProvider;
use super::chat::{ChatCompletionsProvider, ChatFlavor};

pub fn create_provider(
    provider_name: &str,
    api_key: &str,
    model: Option<&str>,
    base_url: Option<&str>,
) -> Result<Box<dyn LLMProvider>, CegirError> {
    match provider_name {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(api_key, model, base_url))),
        "openai" => Ok(Box::new(ChatCompletionsProvider::new(ChatFlavor::OpenAI, api_key, model, base_url))),
        "local" => Ok(Box::new(ChatCompletionsProvider::new(ChatFlavor::Local, api_key, model, base_url))),
        _ => Err(CegirError::Config(format!("Unknown LLM provider: {}", provider_name))),
    }
}

/// Build the configured provider. The key comes from `llm.api_key`
/// (`$VAR` references resolved) or the provider's standard variable.
pub fn provider_from_config(config: &LLMConfig) -> Result<Box<dyn LLMProvider>, CegirError> {
    let name = config.provider.as_deref().unwrap_or("anthropic");
    let key = config.api_key.as_deref()
        .and_then(resolve_credential)
        .or_else(|| provider_key_var(name).and_then(|var| std::env::var(var).ok()))
        .unwrap_or_default();
    if key.is_empty() && name != "local" {
        let hint = provider_key_var(name).unwrap_or("llm.api_key");
        return Err(CegirError::Config(format!(
            "No API key for LLM provider '{}'; set {} or llm.api_key", name, hint
        )));
    }
    create_provider(name, &key, config.model.as_deref(), config.base_url.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert_eq!(create_provider("anthropic", "k", None, None).unwrap().provider_name(), "anthropic");
        let openai = create_provider("openai", "k", Some("gpt-4o-mini"), Some("http://proxy/v1")).unwrap();
        assert_eq!(openai.model_name(), "gpt-4o-mini");
        assert_eq!(create_provider("local", "", None, None).unwrap().provider_name(), "local");
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        assert!(matches!(create_provider("gemini", "k", None, None), Err(CegirError::Config(_))));
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let config = LLMConfig { provider: Some("local".into()), ..Default::default() };
        assert!(provider_from_config(&config).is_ok());
    }

    #[test]
    fn test_literal_key_from_config() {
        let config = LLMConfig {
            provider: Some("openai".into()),
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert_eq!(provider_from_config(&config).unwrap().provider_name(), "openai");
    }
}
