pub mod provider;
pub mod anthropic;
pub mod chat;
pub mod json;
pub mod router;
pub mod types;

pub use json::extract_json;
pub use provider::LLMProvider;
pub use router::{create_provider, provider_from_config};
pub use types::{Completion, LLMResponse, Pricing, TokenUsage};
