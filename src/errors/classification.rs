use super::types::CegirError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl CegirError {
    /// Transient failures of the environment (process spawn, container
    /// daemon, network, collaborator throttling) are retryable. Anything
    /// caused by the inputs fails on the first attempt.
    pub fn classify(&self) -> ErrorClassification {
        use CegirError::*;
        let (error_type, retryable) = match self {
            Spawn(_) => ("SpawnError", true),
            Toolchain(_) => ("ToolchainError", true),
            Container(_) => ("ContainerError", true),
            Docker(_) => ("DockerError", true),
            Timeout(_) => ("TimeoutError", true),
            Network(_) => ("NetworkError", true),
            RateLimit(_) => ("RateLimitError", true),
            LLMApi(_) => ("LLMApiError", true),
            Io(_) => ("IoError", true),

            Input(_) => ("InputError", false),
            Config(_) => ("ConfigError", false),
            Authentication(_) => ("AuthenticationError", false),
            PatchValidation(_) => ("PatchValidationError", false),
            Store(_) => ("StoreError", false),
            Prompt(_) => ("PromptError", false),
            Cancelled(_) => ("CancelledError", false),
            Json(_) => ("JsonError", false),
            Yaml(_) => ("YamlError", false),
            Internal(_) => ("InternalError", false),
        };
        ErrorClassification { error_type, retryable }
    }

    /// Throttling asks for a longer pause than ordinary backoff.
    pub fn is_throttled(&self) -> bool {
        matches!(self, CegirError::RateLimit(_))
    }
}
