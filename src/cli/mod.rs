pub mod commands;
pub mod verify;
pub mod batch;
pub mod validate;
pub mod replay;
pub mod seed;
pub mod progress;

pub use commands::{Cli, Commands};

use std::path::PathBuf;
use crate::config::{self, CegirConfig, LLMConfig, OutputConfig, ToolchainBackend, ToolchainConfig, LoopConfig};
use crate::errors::CegirError;
use commands::RunArgs;

/// Load the config file (or defaults) and apply command-line overrides.
pub async fn load_config(args: &RunArgs) -> Result<CegirConfig, CegirError> {
    let mut config = match &args.config {
        Some(path) => config::parse_config(&PathBuf::from(path)).await?,
        None => CegirConfig::default(),
    };
    apply_overrides(&mut config, args)?;
    Ok(config)
}

pub fn apply_overrides(config: &mut CegirConfig, args: &RunArgs) -> Result<(), CegirError> {
    if let Some(output) = &args.output {
        config.output = Some(OutputConfig { directory: Some(output.clone()) });
    }
    if let Some(iterations) = args.iterations {
        if iterations == 0 {
            return Err(CegirError::Input("--iterations must be at least 1".into()));
        }
        config.refinement.get_or_insert_with(LoopConfig::default).iterations = Some(iterations);
    }
    if let Some(backend) = &args.backend {
        let backend = match backend.as_str() {
            "local" => ToolchainBackend::Local,
            "container" => ToolchainBackend::Container,
            other => return Err(CegirError::Config(format!("Invalid toolchain backend: {}", other))),
        };
        config.toolchain.get_or_insert_with(ToolchainConfig::default).backend = Some(backend);
    }
    if args.provider.is_some() || args.model.is_some() || args.api_key.is_some() || args.base_url.is_some() {
        let llm = config.llm.get_or_insert_with(LLMConfig::default);
        if let Some(provider) = &args.provider {
            llm.provider = Some(provider.clone());
        }
        if let Some(model) = &args.model {
            llm.model = Some(model.clone());
        }
        if let Some(key) = &args.api_key {
            llm.api_key = Some(key.clone());
        }
        if let Some(url) = &args.base_url {
            llm.base_url = Some(url.clone());
        }
    }
    Ok(())
}
