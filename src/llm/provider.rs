use async_trait::async_trait;
use crate::errors::CegirError;
use super::types::{Completion, LLMResponse};

/// Text completion backend of the synthesis collaborator.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: &Completion<'_>) -> Result<LLMResponse, CegirError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}
