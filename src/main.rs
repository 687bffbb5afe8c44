use clap::Parser;
use cegir::cli::{self, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, 0) => "warn",
        (_, 0) => "info",
        (_, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(!cli.no_color)
            .with_writer(std::io::stderr)
            .init();
    }
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
    tracing::debug!(
        built = env!("BUILD_TIMESTAMP"),
        git = option_env!("GIT_HASH").unwrap_or("unknown"),
        "cegir {}",
        env!("CARGO_PKG_VERSION")
    );

    let quiet = cli.quiet;
    let result = match cli.command {
        Commands::Verify(args) => cli::verify::handle_verify(args, quiet).await,
        Commands::Batch(args) => cli::batch::handle_batch(args, quiet).await,
        Commands::Validate(args) => cli::validate::handle_validate(args).await,
        Commands::Replay(args) => cli::replay::handle_replay(args, quiet).await,
        Commands::Seed(args) => cli::seed::handle_seed(args).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}
