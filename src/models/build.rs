use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::errors::CegirError;
use super::location::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BuildFailure {
    Syntax {
        #[serde(default)]
        location: Option<SourceLocation>,
    },
    Link {
        /// Symbols reported as defined more than once.
        #[serde(default)]
        duplicates: Vec<String>,
    },
    MissingSymbol { symbols: Vec<String> },
    Timeout,
}

impl BuildFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "syntax",
            Self::Link { .. } => "link",
            Self::MissingSymbol { .. } => "missing_symbol",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub artifact: Option<PathBuf>,
    pub diagnostic: String,
    pub failure: Option<BuildFailure>,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn succeeded(artifact: PathBuf, diagnostic: String, duration_ms: u64) -> Self {
        Self { success: true, artifact: Some(artifact), diagnostic, failure: None, duration_ms }
    }

    pub fn failed(failure: BuildFailure, diagnostic: String, duration_ms: u64) -> Self {
        Self { success: false, artifact: None, diagnostic, failure: Some(failure), duration_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    #[default]
    Auto,
    Cmake,
    Make,
    Custom,
}

impl BuildSystem {
    /// Resolve `Auto` by looking at the source root: CMake first, then
    /// autotools/make, falling back to `Make` for bare source trees.
    pub fn detect(self, source_root: &Path) -> BuildSystem {
        match self {
            BuildSystem::Auto => {
                if source_root.join("CMakeLists.txt").exists() {
                    BuildSystem::Cmake
                } else {
                    BuildSystem::Make
                }
            }
            other => other,
        }
    }
}

/// How to compile the target sources together with the generated harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDescription {
    pub source_root: PathBuf,
    #[serde(default)]
    pub system: BuildSystem,
    #[serde(default = "default_compiler")]
    pub compiler: String,
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub defines: Vec<String>,
    /// Target sources relative to `source_root`; the harness is always added.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Command templates for `system: custom`. Placeholders: `{harness}`,
    /// `{artifact}`, `{sources}`, `{cflags}`, `{includes}`, `{workdir}`.
    #[serde(default)]
    pub commands: Vec<String>,
}

fn default_compiler() -> String {
    "clang".to_string()
}

impl BuildDescription {
    pub async fn load(path: &Path) -> Result<Self, CegirError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CegirError::Input(format!("Cannot read build description {}: {}", path.display(), e))
        })?;
        let mut description: BuildDescription = serde_yaml::from_str(&content).map_err(|e| {
            CegirError::Input(format!("Malformed build description {}: {}", path.display(), e))
        })?;
        if description.source_root.is_relative() {
            if let Some(parent) = path.parent() {
                description.source_root = parent.join(&description.source_root);
            }
        }
        description.validate()?;
        Ok(description)
    }

    pub fn validate(&self) -> Result<(), CegirError> {
        if !self.source_root.is_dir() {
            return Err(CegirError::Input(format!(
                "Source root {} is not a directory", self.source_root.display()
            )));
        }
        if self.system == BuildSystem::Custom && self.commands.is_empty() {
            return Err(CegirError::Input("Custom build system requires at least one command".into()));
        }
        for source in &self.sources {
            if source.is_absolute() || source.components().any(|c| c == std::path::Component::ParentDir) {
                return Err(CegirError::Input(format!(
                    "Source path {} must be relative to the source root", source.display()
                )));
            }
        }
        Ok(())
    }
}
