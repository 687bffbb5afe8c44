use std::path::{Path, PathBuf};
use console::style;
use crate::cli::commands::ValidateArgs;
use crate::config::parse_config;
use crate::errors::CegirError;
use crate::harness::{render, HarnessLayout, SourceIndex};
use crate::models::{BuildDescription, Plan, VulnerabilitySpec};

pub async fn handle_validate(args: ValidateArgs) -> Result<i32, CegirError> {
    if args.config.is_none() && args.spec.is_none() && args.build.is_none() && args.plan.is_none() {
        return Err(CegirError::Input(
            "Nothing to validate: pass --config, --spec, --build or --plan".into(),
        ));
    }

    if let Some(path) = &args.config {
        let config = parse_config(Path::new(path)).await?;
        ok(path, &format!(
            "{} iterations, backend {}",
            config.iterations(),
            config.toolchain().backend()
        ));
    }

    let spec = match &args.spec {
        Some(path) => {
            let spec = VulnerabilitySpec::load(Path::new(path)).await?;
            spec.validate()?;
            ok(path, &format!("{} at {}", spec.bug_class, spec.site()));
            Some(spec)
        }
        None => None,
    };

    let description = match &args.build {
        Some(path) => {
            let description = BuildDescription::load(Path::new(path)).await?;
            description.validate()?;
            ok(path, &format!("source root {}", description.source_root.display()));
            Some(description)
        }
        None => None,
    };

    if let Some(path) = &args.plan {
        let plan = Plan::load(Path::new(path)).await?;
        plan.validate_structure()?;
        ok(path, &format!(
            "v{}, {} stub(s), {} symbolic input(s)",
            plan.version,
            plan.stubs.len(),
            plan.symbolic_inputs.len()
        ));

        if let (Some(spec), Some(description)) = (&spec, &description) {
            let files = check_renders(&plan, spec, &description.source_root).await?;
            ok(path, &format!("renders against the source tree ({} file(s))", files));
        }
    }

    Ok(0)
}

/// Render the plan without writing anything. Returns the number of harness files.
async fn check_renders(plan: &Plan, spec: &VulnerabilitySpec, source_root: &Path) -> Result<usize, CegirError> {
    let root = source_root.to_path_buf();
    let index = tokio::task::spawn_blocking(move || SourceIndex::scan(&root))
        .await
        .map_err(|e| CegirError::Internal(format!("Source scan task failed: {}", e)))??;
    let layout = HarnessLayout::new(source_root, std::env::temp_dir().join("cegir-validate"));
    let bundle = render(plan, spec, &index, &layout)
        .map_err(|e| CegirError::Input(format!("Plan does not render: {}", e)))?;
    Ok(1 + bundle.instrumented.len() + usize::from(bundle.stubs_source.is_some()))
}

fn ok(path: &str, detail: &str) {
    println!("{} {} {}", style("✓").green(), PathBuf::from(path).display(), style(detail).dim());
}
