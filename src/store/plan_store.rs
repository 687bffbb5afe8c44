use std::path::{Path, PathBuf};
use std::sync::Arc;
use dashmap::DashMap;
use crate::errors::CegirError;
use crate::models::Plan;
use tracing::debug;

/// Append-only, versioned plan storage keyed by (lineage id, version).
///
/// Every lineage owns its own namespace, so independent lineages can commit
/// concurrently. A version is written exactly once; the file is published
/// with a no-clobber hard link so an existing version is never replaced.
pub struct PlanStore {
    root: Option<PathBuf>,
    lineages: DashMap<String, Vec<Arc<Plan>>>,
}

impl PlanStore {
    /// Store that keeps plans only in memory.
    pub fn in_memory() -> Self {
        Self { root: None, lineages: DashMap::new() }
    }

    /// File-backed store rooted at `root` (one sub-directory per lineage).
    pub async fn open(root: &Path) -> Result<Self, CegirError> {
        tokio::fs::create_dir_all(root).await?;
        Ok(Self { root: Some(root.to_path_buf()), lineages: DashMap::new() })
    }

    pub fn plans_dir(root: &Path, lineage: &str) -> PathBuf {
        root.join(lineage).join("plans")
    }

    pub fn plan_file(root: &Path, lineage: &str, version: u32) -> PathBuf {
        Self::plans_dir(root, lineage).join(format!("v{:04}.json", version))
    }

    /// Commit the next version of a lineage. The plan's version must be
    /// exactly one past the latest committed version (0 for a new lineage).
    pub async fn commit(&self, lineage: &str, plan: Plan) -> Result<Arc<Plan>, CegirError> {
        validate_lineage_id(lineage)?;
        let expected = self.next_version(lineage);
        if plan.version != expected {
            return Err(CegirError::Store(format!(
                "Lineage {}: expected version {}, got {}", lineage, expected, plan.version
            )));
        }

        if let Some(root) = &self.root {
            let dir = Self::plans_dir(root, lineage);
            tokio::fs::create_dir_all(&dir).await?;
            let path = Self::plan_file(root, lineage, plan.version);
            let tmp = dir.join(format!(".v{:04}.json.tmp", plan.version));
            let json = serde_json::to_string_pretty(&plan)?;
            tokio::fs::write(&tmp, &json).await?;
            let published = tokio::fs::hard_link(&tmp, &path).await;
            let _ = tokio::fs::remove_file(&tmp).await;
            published.map_err(|e| CegirError::Store(format!(
                "Cannot publish {}: {}", path.display(), e
            )))?;
        }

        let plan = Arc::new(plan);
        let mut versions = self.lineages.entry(lineage.to_string()).or_default();
        if versions.len() as u32 != plan.version {
            return Err(CegirError::Store(format!(
                "Lineage {}: concurrent commit of version {}", lineage, plan.version
            )));
        }
        versions.push(plan.clone());
        debug!(lineage, version = plan.version, "Plan committed");
        Ok(plan)
    }

    pub fn latest(&self, lineage: &str) -> Option<Arc<Plan>> {
        self.lineages.get(lineage).and_then(|v| v.last().cloned())
    }

    pub fn get(&self, lineage: &str, version: u32) -> Option<Arc<Plan>> {
        self.lineages.get(lineage).and_then(|v| v.get(version as usize).cloned())
    }

    pub fn versions(&self, lineage: &str) -> Vec<u32> {
        self.lineages.get(lineage)
            .map(|v| v.iter().map(|p| p.version).collect())
            .unwrap_or_default()
    }

    fn next_version(&self, lineage: &str) -> u32 {
        self.lineages.get(lineage).map(|v| v.len() as u32).unwrap_or(0)
    }

    /// Read a lineage's committed history back from disk, checking that the
    /// versions form a gap-free sequence starting at 0.
    pub async fn load_lineage(root: &Path, lineage: &str) -> Result<Vec<Plan>, CegirError> {
        validate_lineage_id(lineage)?;
        let pattern = Self::plans_dir(root, lineage).join("v*.json");
        let pattern = pattern.to_string_lossy().to_string();
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| CegirError::Store(format!("Bad plan pattern: {}", e)))?
            .filter_map(Result::ok)
            .collect();
        paths.sort();

        let mut plans = Vec::with_capacity(paths.len());
        for (expected, path) in paths.iter().enumerate() {
            let content = tokio::fs::read_to_string(path).await?;
            let plan: Plan = serde_json::from_str(&content)?;
            if plan.version != expected as u32 {
                return Err(CegirError::Store(format!(
                    "{}: holds version {}, expected {}", path.display(), plan.version, expected
                )));
            }
            plans.push(plan);
        }
        Ok(plans)
    }
}

/// Lineage ids name directories; keep them to a conservative character set.
pub fn validate_lineage_id(lineage: &str) -> Result<(), CegirError> {
    let ok = !lineage.is_empty()
        && lineage.len() <= 128
        && lineage != "."
        && lineage != ".."
        && lineage.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CegirError::Input(format!("Invalid lineage id '{}'", lineage)))
    }
}
