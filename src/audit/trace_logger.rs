use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use crate::errors::CegirError;
use crate::models::{Trace, TraceRecord};

pub const TRACE_FILE: &str = "trace.jsonl";

/// Machine-readable trace stream: one JSON record per iteration, flushed as
/// soon as it is written so a crash never loses a finished iteration.
pub struct TraceLogger {
    path: PathBuf,
    file: tokio::fs::File,
}

impl TraceLogger {
    pub async fn new(base_dir: &Path) -> Result<Self, CegirError> {
        let path = base_dir.join(TRACE_FILE);
        let file = tokio::fs::OpenOptions::new()
            .create(true).truncate(true).write(true).open(&path).await?;
        Ok(Self { path, file })
    }

    pub async fn append(&mut self, record: &TraceRecord) -> Result<(), CegirError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a trace stream back. Blank lines are skipped; a malformed line is an error.
pub async fn read_trace(path: &Path) -> Result<Trace, CegirError> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut trace = Trace::default();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: TraceRecord = serde_json::from_str(line).map_err(|e| {
            CegirError::Store(format!("{}:{}: malformed trace record: {}", path.display(), n + 1, e))
        })?;
        trace.push(record);
    }
    Ok(trace)
}
