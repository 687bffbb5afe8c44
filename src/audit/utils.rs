use std::path::Path;
use crate::errors::CegirError;

/// Atomic file write: write to a sibling temp file, then rename over `path`.
pub async fn atomic_write(path: &Path, content: &str) -> Result<(), CegirError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.json");
        atomic_write(&path, "{\"a\": 1}").await.unwrap();
        atomic_write(&path, "{\"a\": 2}").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\": 2}");
        assert!(!dir.path().join("final.json.tmp").exists());
    }
}
