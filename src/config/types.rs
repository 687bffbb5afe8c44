use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::errors::RetryConfig;
use crate::models::ExecutionBudget;

pub const DEFAULT_ITERATIONS: u32 = 8;
pub const DEFAULT_LOCAL_MOVE_LIMIT: u32 = 3;
pub const DEFAULT_MAX_PATCH_RETRIES: u32 = 3;
pub const DEFAULT_OUTPUT_DIR: &str = "cegir-output";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TOOLCHAIN_IMAGE: &str = "cegir-toolchain:latest";
pub const DEFAULT_CONTAINER_NAME: &str = "cegir-toolchain";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CegirConfig {
    #[serde(rename = "loop")]
    pub refinement: Option<LoopConfig>,
    pub budget: Option<BudgetConfig>,
    pub retry: Option<RetrySettings>,
    pub toolchain: Option<ToolchainConfig>,
    pub llm: Option<LLMConfig>,
    pub output: Option<OutputConfig>,
    pub batch: Option<BatchConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoopConfig {
    pub iterations: Option<u32>,
    pub local_move_limit: Option<u32>,
    pub max_patch_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BudgetLimits {
    pub time_secs: Option<u64>,
    pub max_memory_mb: Option<u64>,
    pub max_instructions: Option<u64>,
    pub build_timeout_secs: Option<u64>,
}

impl BudgetLimits {
    fn over(&self, base: ExecutionBudget) -> ExecutionBudget {
        ExecutionBudget {
            time_secs: self.time_secs.unwrap_or(base.time_secs),
            max_memory_mb: self.max_memory_mb.unwrap_or(base.max_memory_mb),
            max_instructions: self.max_instructions.unwrap_or(base.max_instructions),
            build_timeout_secs: self.build_timeout_secs.unwrap_or(base.build_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BudgetConfig {
    #[serde(flatten)]
    pub initial: BudgetLimits,
    pub ceiling: Option<BudgetLimits>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainBackend {
    #[default]
    Local,
    Container,
}

impl ToolchainBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for ToolchainBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ToolchainConfig {
    pub backend: Option<ToolchainBackend>,
    pub klee: Option<String>,
    pub ktest_tool: Option<String>,
    pub llvm_link: Option<String>,
    pub llvm_nm: Option<String>,
    /// Extra engine arguments appended after the budget flags.
    pub klee_args: Option<Vec<String>>,
    /// Seconds added to the engine's own time limit before the process is killed.
    pub grace_secs: Option<u64>,
    pub image: Option<String>,
    pub container_name: Option<String>,
}

impl ToolchainConfig {
    pub fn backend(&self) -> ToolchainBackend {
        self.backend.unwrap_or_default()
    }

    pub fn klee(&self) -> String {
        self.klee.clone().unwrap_or_else(|| "klee".to_string())
    }

    pub fn ktest_tool(&self) -> String {
        self.ktest_tool.clone().unwrap_or_else(|| "ktest-tool".to_string())
    }

    pub fn llvm_link(&self) -> String {
        self.llvm_link.clone().unwrap_or_else(|| "llvm-link".to_string())
    }

    pub fn llvm_nm(&self) -> String {
        self.llvm_nm.clone().unwrap_or_else(|| "llvm-nm".to_string())
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs.unwrap_or(30))
    }

    pub fn image(&self) -> String {
        self.image.clone().unwrap_or_else(|| DEFAULT_TOOLCHAIN_IMAGE.to_string())
    }

    pub fn container_name(&self) -> String {
        self.container_name.clone().unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LLMConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct OutputConfig {
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BatchConfig {
    pub concurrency: Option<usize>,
}

impl CegirConfig {
    pub fn iterations(&self) -> u32 {
        self.refinement.as_ref().and_then(|l| l.iterations).unwrap_or(DEFAULT_ITERATIONS)
    }

    pub fn local_move_limit(&self) -> u32 {
        self.refinement.as_ref().and_then(|l| l.local_move_limit).unwrap_or(DEFAULT_LOCAL_MOVE_LIMIT)
    }

    pub fn max_patch_retries(&self) -> u32 {
        self.refinement.as_ref().and_then(|l| l.max_patch_retries).unwrap_or(DEFAULT_MAX_PATCH_RETRIES)
    }

    pub fn initial_budget(&self) -> ExecutionBudget {
        match &self.budget {
            Some(b) => b.initial.over(ExecutionBudget::default()),
            None => ExecutionBudget::default(),
        }
    }

    pub fn budget_ceiling(&self) -> ExecutionBudget {
        let base = default_ceiling();
        match self.budget.as_ref().and_then(|b| b.ceiling.as_ref()) {
            Some(c) => c.over(base),
            None => base,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        match &self.retry {
            Some(r) => RetryConfig {
                max_retries: r.max_retries.unwrap_or(defaults.max_retries),
                base_delay: r.base_delay_ms.map(Duration::from_millis).unwrap_or(defaults.base_delay),
            },
            None => defaults,
        }
    }

    pub fn toolchain(&self) -> ToolchainConfig {
        self.toolchain.clone().unwrap_or_default()
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(
            self.output.as_ref()
                .and_then(|o| o.directory.clone())
                .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
        )
    }

    pub fn concurrency(&self) -> usize {
        self.batch.as_ref().and_then(|b| b.concurrency).unwrap_or(DEFAULT_CONCURRENCY)
    }
}

fn default_ceiling() -> ExecutionBudget {
    ExecutionBudget {
        time_secs: 1800,
        max_memory_mb: 8192,
        max_instructions: 1_000_000_000,
        build_timeout_secs: 1200,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_sections() {
        let config = CegirConfig::default();
        assert_eq!(config.iterations(), DEFAULT_ITERATIONS);
        assert_eq!(config.initial_budget(), ExecutionBudget::default());
        assert_eq!(config.toolchain().backend(), ToolchainBackend::Local);
        assert_eq!(config.output_dir(), PathBuf::from("cegir-output"));
        assert_eq!(config.retry_config().max_retries, 3);
    }

    #[test]
    fn test_budget_section_overrides_and_ceiling() {
        let config: CegirConfig = serde_yaml::from_str(
            "budget:\n  time_secs: 30\n  ceiling:\n    time_secs: 240\n",
        ).unwrap();
        assert_eq!(config.initial_budget().time_secs, 30);
        assert_eq!(config.initial_budget().max_memory_mb, ExecutionBudget::default().max_memory_mb);
        assert_eq!(config.budget_ceiling().time_secs, 240);
        assert_eq!(config.budget_ceiling().max_memory_mb, 8192);
    }

    #[test]
    fn test_loop_section_uses_loop_key() {
        let config: CegirConfig = serde_yaml::from_str(
            "loop:\n  iterations: 5\n  local_move_limit: 2\n",
        ).unwrap();
        assert_eq!(config.iterations(), 5);
        assert_eq!(config.local_move_limit(), 2);
        assert_eq!(config.max_patch_retries(), DEFAULT_MAX_PATCH_RETRIES);
    }

    #[test]
    fn test_backend_deserialize() {
        let parsed: ToolchainBackend = serde_json::from_str("\"container\"").unwrap();
        assert_eq!(parsed, ToolchainBackend::Container);
        assert_eq!(format!("{}", parsed), "container");
    }
}
