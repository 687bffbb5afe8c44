use clap::{Parser, Subcommand, Args};

#[derive(Parser)]
#[command(name = "cegir", version, about = "Counterexample-guided harness refinement for vulnerability reports")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Refine a harness for one vulnerability spec until it reproduces
    Verify(VerifyArgs),
    /// Verify many specs concurrently
    Batch(BatchArgs),
    /// Validate configuration, spec, build description and plan files
    Validate(ValidateArgs),
    /// Inspect a finished lineage and check its trace against the plan store
    Replay(ReplayArgs),
    /// Print the seed plan derived from a spec
    Seed(SeedArgs),
}

/// Settings shared by `verify` and `batch`; flags override the config file.
#[derive(Args, Clone, Default)]
pub struct RunArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output directory for plans, traces and reports
    #[arg(short, long)]
    pub output: Option<String>,

    /// Iteration budget per lineage
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Toolchain backend: local, container
    #[arg(long)]
    pub backend: Option<String>,

    /// LLM provider for patch synthesis: anthropic, openai, local
    #[arg(long)]
    pub provider: Option<String>,

    /// LLM model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// LLM API key (or use env vars)
    #[arg(long)]
    pub api_key: Option<String>,

    /// LLM endpoint override
    #[arg(long)]
    pub base_url: Option<String>,

    /// Directory with prompt templates overriding the built-in ones
    #[arg(long)]
    pub prompts_dir: Option<String>,
}

#[derive(Args, Clone)]
pub struct VerifyArgs {
    /// Vulnerability spec (JSON)
    #[arg(short, long)]
    pub spec: String,

    /// Build description (YAML or JSON)
    #[arg(short, long)]
    pub build: String,

    /// Seed plan (JSON); derived from the spec when omitted
    #[arg(long)]
    pub seed: Option<String>,

    /// Custom lineage identifier
    #[arg(long)]
    pub lineage: Option<String>,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Clone)]
pub struct BatchArgs {
    /// Spec files or glob patterns
    #[arg(required = true)]
    pub specs: Vec<String>,

    /// Build description shared by all specs
    #[arg(short, long)]
    pub build: String,

    /// Maximum lineages in flight
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Print the batch summary as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(short, long)]
    pub config: Option<String>,

    /// Spec file to validate
    #[arg(short, long)]
    pub spec: Option<String>,

    /// Build description to validate
    #[arg(short, long)]
    pub build: Option<String>,

    /// Plan file to validate (rendered against the spec and build when given)
    #[arg(short, long)]
    pub plan: Option<String>,
}

#[derive(Args, Clone)]
pub struct ReplayArgs {
    /// Lineage directory (`<output>/<lineage>`)
    pub lineage_dir: String,

    /// Show diffs between consecutive plan versions
    #[arg(long)]
    pub diff: bool,

    /// Print the trace as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct SeedArgs {
    /// Vulnerability spec (JSON)
    #[arg(short, long)]
    pub spec: String,

    /// YAML configuration file (for the initial budget)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Write the plan here instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,
}
