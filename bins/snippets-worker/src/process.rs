// Local process runtime.
// Runs the command directly on the host, in the job directory, with only the
// time budget enforced. No memory cap and no isolation: development and tests only.
// The snippet leads its own process group, which is killed once it finishes.

use crate::engine::{ExecutionOutcome, OutputCapture, SandboxRuntime, Termination, TIMEOUT_EXIT_CODE};
use crate::error::SandboxError;
use async_trait::async_trait;
use snippets_common::profile::LanguageProfile;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long output pipes may stay open after the snippet itself is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEngine;

impl ProcessEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Exit code of a finished process; signals map to 128 + signal like a shell
fn status_code(status: ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return code as i64;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as i64;
        }
    }
    -1
}

/// SIGKILL the whole process group the snippet leads, background children included
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else { return };
    // SAFETY: kill(2) with a negative pid only signals the group, no memory is touched
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}

/// Read one pipe on its own task, so a slow pipe never holds up the wait
fn pump<R>(mut reader: R, stream: &'static str) -> JoinHandle<OutputCapture>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut capture = OutputCapture::default();
        if let Err(e) = capture.drain(&mut reader).await {
            warn!(stream, error = %e, "Failed to read process output");
        }
        capture
    })
}

/// Collect a pump, giving up after the grace period
async fn collect(handle: JoinHandle<OutputCapture>, stream: &'static str) -> OutputCapture {
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(capture)) => capture,
        Ok(Err(e)) => {
            warn!(stream, error = %e, "Output reader task failed");
            OutputCapture::default()
        }
        Err(_) => {
            warn!(stream, "Output pipe still open after exit, dropping the rest");
            OutputCapture::default()
        }
    }
}

#[async_trait]
impl SandboxRuntime for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn launch(
        &self,
        profile: &LanguageProfile,
        work_dir: &Path,
        entry_file: &str,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let argv = profile.command.render(entry_file);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SandboxError::Launch("empty command".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so anything the snippet forks can be killed with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| SandboxError::Launch(format!("Failed to spawn '{}': {}", program, e)))?;
        let pgid = child.id();

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Launch("stdout not captured".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Launch("stderr not captured".to_string()))?;

        let start_time = Instant::now();
        let stdout_task = pump(stdout_pipe, "stdout");
        let stderr_task = pump(stderr_pipe, "stderr");

        // Termination follows the snippet process itself, not its pipes
        let timeout_duration = Duration::from_secs(profile.timeout_seconds);
        let waited = tokio::time::timeout(timeout_duration, child.wait()).await;
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        let result = match waited {
            Ok(Ok(status)) => Ok((status_code(status), Termination::Exited)),
            Ok(Err(e)) => Err(SandboxError::Lost(e.to_string())),
            Err(_) => {
                debug!(timeout_seconds = profile.timeout_seconds, "Process timed out, killing");
                kill_group(pgid);
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                let _ = child.wait().await;
                Ok((TIMEOUT_EXIT_CODE, Termination::TimedOut))
            }
        };

        // Leftover background children would keep the pipes open
        kill_group(pgid);
        let stdout = collect(stdout_task, "stdout").await;
        let stderr = collect(stderr_task, "stderr").await;
        let (exit_code, termination) = result?;

        Ok(ExecutionOutcome {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code,
            termination,
            timeout_seconds: profile.timeout_seconds,
            execution_time_ms,
        })
    }
}
