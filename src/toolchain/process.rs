use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use crate::container::ContainerManager;
use crate::errors::CegirError;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was killed or never reported one.
    pub code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    pub fn combined(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Where toolchain commands run.
#[derive(Clone)]
pub enum ProcessBackend {
    Local,
    Container(Arc<ContainerManager>),
}

impl ProcessBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Container(_) => "container",
        }
    }

    /// Run `program args..` in `cwd`. Failure to start is a `Spawn` error
    /// (transient); a non-zero exit or timeout is reported in the output.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, CegirError> {
        match self {
            Self::Local => run_local(program, args, cwd, timeout).await,
            Self::Container(manager) => {
                let argv = std::iter::once(program.to_string()).chain(args.iter().cloned()).collect();
                manager.exec(argv, cwd, timeout).await
            }
        }
    }

    /// Run a shell command line (custom build steps).
    pub async fn run_shell(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<ProcessOutput, CegirError> {
        match self {
            Self::Local => run_local("sh", &["-c".to_string(), command.to_string()], cwd, timeout).await,
            Self::Container(manager) => {
                let argv = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
                manager.exec(argv, cwd, timeout).await
            }
        }
    }
}

/// How long pipes are drained after a timed-out child is killed.
/// Grandchildren can keep them open past the kill.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

async fn run_local(program: &str, args: &[String], cwd: &Path, timeout: Duration) -> Result<ProcessOutput, CegirError> {
    debug!(program, args = args.len(), cwd = %cwd.display(), "Spawning toolchain process");
    let started = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CegirError::Spawn(format!("{}: {}", program, e)))?;

    let stdout = Captured::start(child.stdout.take());
    let stderr = Captured::start(child.stderr.take());

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    match waited {
        Ok(status) => {
            let status = status.map_err(|e| CegirError::Spawn(format!("{}: {}", program, e)))?;
            Ok(ProcessOutput {
                code: status.code().map(i64::from),
                stdout: stdout.finish(None).await,
                stderr: stderr.finish(None).await,
                timed_out: false,
                duration_ms: started.elapsed().as_millis() as u64,
            })
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                debug!(program, error = %e, "Kill after timeout failed");
            }
            let stdout = stdout.finish(Some(DRAIN_GRACE)).await;
            let mut stderr = stderr.finish(Some(DRAIN_GRACE)).await;
            note_timeout(&mut stderr, program, timeout);
            Ok(ProcessOutput {
                code: None,
                stdout,
                stderr,
                timed_out: true,
                duration_ms: started.elapsed().as_millis() as u64,
            })
        }
    }
}

/// A child pipe drained in the background, so output written before a
/// kill is still available.
struct Captured {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Captured {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = pipe.map(|mut pipe| {
            let buf = buf.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buf, task }
    }

    /// Wait for end of stream, or at most `grace`, and return what was read.
    async fn finish(mut self, grace: Option<Duration>) -> String {
        if let Some(mut task) = self.task.take() {
            match grace {
                Some(grace) => {
                    if tokio::time::timeout(grace, &mut task).await.is_err() {
                        task.abort();
                    }
                }
                None => {
                    let _ = task.await;
                }
            }
        }
        let bytes = self.buf.lock().await;
        String::from_utf8_lossy(&bytes).to_string()
    }
}

/// Append the timeout line to whatever a killed command wrote.
pub(crate) fn note_timeout(stderr: &mut String, program: &str, timeout: Duration) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(&format!("{} timed out after {}s", program, timeout.as_secs()));
}

/// Single-quote a word for `sh`.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | ','))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--max-time=60"), "--max-time=60");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_combined_output() {
        let out = ProcessOutput { stdout: "a".into(), stderr: "b".into(), code: Some(0), ..Default::default() };
        assert_eq!(out.combined(), "a\nb");
        assert!(out.success());
        let timed = ProcessOutput { timed_out: true, code: Some(0), ..Default::default() };
        assert!(!timed.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_run_captures_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessBackend::Local
            .run_shell("echo hi; echo oops >&2; exit 3", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessBackend::Local
            .run_shell("sleep 5", dir.path(), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_run_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessBackend::Local
            .run_shell(
                "echo 'KLEE: done: total instructions = 1200' >&2; echo progress; sleep 5",
                dir.path(),
                Duration::from_millis(300),
            )
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(out.stderr.contains("KLEE: done: total instructions = 1200"), "{}", out.stderr);
        assert!(out.stderr.ends_with("timed out after 0s"));
        assert_eq!(out.stdout.trim(), "progress");
        assert!(out.duration_ms < 3000);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessBackend::Local
            .run("cegir-definitely-not-a-program", &[], dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CegirError::Spawn(_)));
    }
}
