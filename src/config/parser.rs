use std::path::Path;
use crate::errors::CegirError;
use super::types::CegirConfig;
use super::security::validate_security_patterns;
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

pub async fn parse_config(path: &Path) -> Result<CegirConfig, CegirError> {
    if !path.exists() {
        return Err(CegirError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(CegirError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<CegirConfig, CegirError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    if yaml.is_null() {
        return Ok(CegirConfig::default());
    }

    validate_security_patterns(&yaml)?;

    // Advisory: unknown keys and out-of-range values are reported, typed
    // parsing and conflict checks below are what reject a config.
    validate_schema(&yaml)?;

    let config: CegirConfig = serde_yaml::from_value(yaml)
        .map_err(|e| CegirError::Config(format!("Invalid config: {}", e)))?;

    validate_conflicts(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), CegirError> {
    let json_str = serde_json::to_string(yaml)
        .map_err(|e| CegirError::Config(format!("Config conversion error: {}", e)))?;
    let json_value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| CegirError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| CegirError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        let messages: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        for msg in &messages {
            warn!(validation_error = %msg, "Config schema warning");
        }
    }

    Ok(())
}

/// Detect semantic conflicts in the parsed configuration.
fn validate_conflicts(config: &CegirConfig) -> Result<(), CegirError> {
    if config.iterations() == 0 {
        return Err(CegirError::Config("loop.iterations must be at least 1".into()));
    }
    if config.max_patch_retries() == 0 {
        return Err(CegirError::Config("loop.max_patch_retries must be at least 1".into()));
    }
    if config.concurrency() == 0 {
        return Err(CegirError::Config("batch.concurrency must be at least 1".into()));
    }

    let initial = config.initial_budget();
    let ceiling = config.budget_ceiling();
    let checks = [
        ("time_secs", initial.time_secs, ceiling.time_secs),
        ("max_memory_mb", initial.max_memory_mb, ceiling.max_memory_mb),
        ("max_instructions", initial.max_instructions, ceiling.max_instructions),
        ("build_timeout_secs", initial.build_timeout_secs, ceiling.build_timeout_secs),
    ];
    for (name, value, limit) in checks {
        if value == 0 {
            return Err(CegirError::Config(format!("budget.{} must be positive", name)));
        }
        if value > limit {
            return Err(CegirError::Config(format!(
                "budget.{} ({}) exceeds its ceiling ({})", name, value, limit
            )));
        }
    }

    if let Some(llm) = &config.llm {
        let has_key = llm.api_key.as_ref().is_some_and(|k| !k.is_empty());
        let is_local = llm.provider.as_deref() == Some("local");
        if !has_key && !is_local {
            warn!("LLM provider configured without api_key; falling back to environment");
        }
    }

    Ok(())
}
