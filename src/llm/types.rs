use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Single-turn completion: one user prompt with an optional system preamble.
#[derive(Debug, Clone, Copy)]
pub struct Completion<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl<'a> Completion<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self { system: None, prompt, max_tokens: DEFAULT_MAX_TOKENS, temperature: DEFAULT_TEMPERATURE }
    }

    pub fn system(mut self, system: &'a str) -> Self {
        self.system = Some(system);
        self
    }

    pub fn limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
}

impl Pricing {
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        (usage.input as f64 * self.input + usage.output as f64 * self.output) / 1_000_000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    /// Present when the provider's prices are known.
    pub cost_usd: Option<f64>,
}

impl LLMResponse {
    pub fn metered(content: String, model: &str, usage: Option<TokenUsage>, pricing: Option<Pricing>) -> Self {
        let cost_usd = match (usage, pricing) {
            (Some(usage), Some(pricing)) => Some(pricing.cost(usage)),
            _ => None,
        };
        Self { content, model: model.to_string(), usage, cost_usd }
    }
}
