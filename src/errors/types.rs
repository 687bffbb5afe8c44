use thiserror::Error;

#[derive(Debug, Error)]
pub enum CegirError {
    /// Malformed spec, build description or plan.
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A toolchain or engine binary could not be started.
    #[error("Could not start {0}")]
    Spawn(String),

    /// The toolchain misbehaved in a way unrelated to the plan.
    #[error("Toolchain failure: {0}")]
    Toolchain(String),

    #[error("Toolchain container: {0}")]
    Container(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Synthesis provider error: {0}")]
    LLMApi(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A synthesized patch was rejected before reaching a plan.
    #[error("Patch rejected: {0}")]
    PatchValidation(String),

    #[error("Plan store: {0}")]
    Store(String),

    #[error("Prompt template: {0}")]
    Prompt(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Docker: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CegirError {
    /// Process exit code for errors that escape the refinement loop.
    pub fn exit_code(&self) -> i32 {
        match self {
            CegirError::Input(_) | CegirError::Config(_) | CegirError::Json(_) | CegirError::Yaml(_) => 2,
            CegirError::Cancelled(_) => 130,
            _ => 1,
        }
    }
}
