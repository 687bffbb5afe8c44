use std::path::Path;
use std::time::{Duration, Instant};
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures::StreamExt;
use crate::errors::CegirError;
use crate::toolchain::process::note_timeout;
use crate::toolchain::ProcessOutput;
use super::manager::ContainerManager;
use tracing::debug;

impl ContainerManager {
    /// Run `argv` inside the toolchain container from `cwd`. Exceeding
    /// `timeout` is reported through `timed_out`, not as an error.
    pub async fn exec(&self, argv: Vec<String>, cwd: &Path, timeout: Duration) -> Result<ProcessOutput, CegirError> {
        let program = argv.first().cloned().unwrap_or_default();
        debug!(container = %self.name(), program = %program, cwd = %cwd.display(), "Container exec");
        let started = Instant::now();

        let created = self.docker()
            .create_exec(self.name(), CreateExecOptions {
                cmd: Some(argv),
                working_dir: Some(cwd.to_string_lossy().into_owned()),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            })
            .await
            .map_err(|e| CegirError::Spawn(format!("{} in container {}: {}", program, self.name(), e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let drained = tokio::time::timeout(timeout, self.drain(&created.id, &mut stdout, &mut stderr)).await;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
        let Ok(drained) = drained else {
            note_timeout(&mut stderr, &program, timeout);
            return Ok(ProcessOutput {
                code: None,
                stdout,
                stderr,
                timed_out: true,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        };
        drained?;

        let code = self.docker().inspect_exec(&created.id).await?.exit_code;
        Ok(ProcessOutput {
            code,
            stdout,
            stderr,
            timed_out: false,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn drain(&self, exec_id: &str, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) -> Result<(), CegirError> {
        if let StartExecResults::Attached { mut output, .. } = self.docker().start_exec(exec_id, None).await? {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.extend_from_slice(&message)
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }
        Ok(())
    }
}
