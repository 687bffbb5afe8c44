use std::path::Path;
use crate::audit::atomic_write;
use crate::cli::commands::SeedArgs;
use crate::config::{parse_config, CegirConfig};
use crate::errors::CegirError;
use crate::models::{Plan, VulnerabilitySpec};
use tracing::info;

pub async fn handle_seed(args: SeedArgs) -> Result<i32, CegirError> {
    let spec = VulnerabilitySpec::load(Path::new(&args.spec)).await?;
    spec.validate()?;
    let config = match &args.config {
        Some(path) => parse_config(Path::new(path)).await?,
        None => CegirConfig::default(),
    };

    let plan = Plan::seed(&spec, config.initial_budget());
    plan.validate_structure()?;
    let json = serde_json::to_string_pretty(&plan)?;

    match &args.output {
        Some(path) => {
            atomic_write(Path::new(path), &json).await?;
            info!(spec = %spec.id, path = %path, "Seed plan written");
        }
        None => println!("{}", json),
    }
    Ok(0)
}
