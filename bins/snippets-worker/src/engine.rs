/// Sandbox Executor - Isolated Execution of Untrusted Snippets
///
/// **Core Responsibility:**
/// Run the resolved command against the fetched file inside an isolated,
/// resource-bounded environment and capture what it prints.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker here, a local process in process.rs)
/// - Engine does NOT inspect or sanitize the snippet
/// - Engine does NOT format replies
/// - A nonzero exit or a timeout is an outcome, not an error
///
/// Only failing to launch the sandbox is an error (`SandboxError`).

use crate::error::SandboxError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use snippets_common::profile::LanguageProfile;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Exit status reported for a run that exceeded its time budget.
/// Same value coreutils `timeout` exits with.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Exit status of a container killed by SIGKILL, usually the OOM killer
const KILLED_EXIT_CODE: i64 = 137;

/// Captured bytes per stream beyond this are dropped
pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

/// Extra time the outer guard gives the in-container `timeout` before killing
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Mount point of the job directory inside the container
const CONTAINER_WORKDIR: &str = "/local";

const PIDS_LIMIT: i64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The program ended on its own, with any exit code
    Exited,
    /// The program was killed for exceeding its time budget
    TimedOut,
}

/// Result of one sandboxed run
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub termination: Termination,
    pub timeout_seconds: u64,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    /// stdout when it has anything, stderr otherwise
    pub fn raw_output(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }

    pub fn succeeded(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == 0
    }

    /// Note appended to the reply of a failed run. Timeouts and nonzero
    /// exits get different wording.
    pub fn failure_annotation(&self) -> Option<String> {
        match self.termination {
            Termination::TimedOut => Some(format!(
                "Your snippet timed out after {} seconds",
                self.timeout_seconds
            )),
            Termination::Exited if self.exit_code == KILLED_EXIT_CODE => Some(format!(
                "Your snippet failed with exit code: {} (killed, likely out of memory)",
                self.exit_code
            )),
            Termination::Exited if self.exit_code != 0 => Some(format!(
                "Your snippet failed with exit code: {}",
                self.exit_code
            )),
            Termination::Exited => None,
        }
    }
}

/// Append-only buffer for one output stream.
///
/// Every chunk is kept; a process may print across many scheduling events.
/// Decoding happens once at the end so multi-byte characters split across
/// chunks survive.
#[derive(Debug, Default)]
pub struct OutputCapture {
    bytes: Vec<u8>,
    dropped: usize,
}

impl OutputCapture {
    pub fn push(&mut self, chunk: &[u8]) {
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.bytes.len());
        let kept = chunk.len().min(room);
        self.bytes.extend_from_slice(&chunk[..kept]);
        self.dropped += chunk.len() - kept;
    }

    /// Read `reader` to EOF, keeping everything it yields
    pub async fn drain<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<()> {
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.push(&buf[..n]);
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// The in-container `timeout` exits 124, but so may the snippet itself.
/// Only a run that also used up its budget counts as timed out.
fn classify_exit(exit_code: i64, elapsed: Duration, timeout_seconds: u64) -> Termination {
    if exit_code == TIMEOUT_EXIT_CODE && elapsed >= Duration::from_secs(timeout_seconds) {
        Termination::TimedOut
    } else {
        Termination::Exited
    }
}

/// Narrow seam over the isolation runtime, so Docker can be swapped for
/// another jail without touching the pipeline.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `profile.command` against `entry_file` inside `work_dir`
    async fn launch(
        &self,
        profile: &LanguageProfile,
        work_dir: &Path,
        entry_file: &str,
    ) -> Result<ExecutionOutcome, SandboxError>;
}

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

/// Build the container for one run.
///
/// **Sandbox Rules:**
/// 1. Memory capped at the profile limit, swap included
/// 2. Network disabled
/// 3. Job directory bind-mounted read-write at /local, nothing else shared
/// 4. Command wrapped in `timeout <seconds>`
pub fn container_config(
    profile: &LanguageProfile,
    work_dir: &Path,
    entry_file: &str,
) -> Config<String> {
    let mut cmd = vec!["timeout".to_string(), profile.timeout_seconds.to_string()];
    cmd.extend(profile.command.render(entry_file));

    let memory = (profile.memory_limit_mb as i64) * 1024 * 1024;

    Config {
        image: Some(profile.image.clone()),
        cmd: Some(cmd),
        working_dir: Some(CONTAINER_WORKDIR.to_string()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true),
        host_config: Some(bollard::models::HostConfig {
            memory: Some(memory),
            memory_swap: Some(memory),
            pids_limit: Some(PIDS_LIMIT),
            binds: Some(vec![format!(
                "{}:{}",
                work_dir.display(),
                CONTAINER_WORKDIR
            )]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Docker-based sandbox, the production runtime
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Launch(format!("Failed to connect to Docker daemon: {}", e)))?;
        Ok(Self { docker })
    }

    /// Check the daemon answers; run once at startup
    pub async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map_err(|e| SandboxError::Launch(format!("Docker ping failed: {}", e)))?;
        Ok(())
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| {
                SandboxError::Launch(format!("Failed to pull image '{}': {}", image, e))
            })?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn wait_exit_code(&self, container_id: &str) -> Result<i64, SandboxError> {
        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a nonzero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::Lost(e.to_string())),
            None => Err(SandboxError::Lost("no wait response from container".to_string())),
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    #[tracing::instrument(skip(self, profile, work_dir), fields(image = %profile.image))]
    async fn launch(
        &self,
        profile: &LanguageProfile,
        work_dir: &Path,
        entry_file: &str,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.ensure_image(&profile.image).await?;

        let container_name = format!("snippet-{}", uuid::Uuid::new_v4());
        let config = container_config(profile, work_dir, entry_file);

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self.docker.create_container(Some(create_options), config).await?;
        let container_id = container.id.clone();

        // Set up immediately so the container goes away on every exit path
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start_time = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;

        let mut stdout = OutputCapture::default();
        let mut stderr = OutputCapture::default();

        let execution_future = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(&container_id, logs_options);
            while let Some(output) = logs_stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            self.wait_exit_code(&container_id).await
        };

        let guard_duration = Duration::from_secs(profile.timeout_seconds) + KILL_GRACE;
        let timeout_result = tokio::time::timeout(guard_duration, execution_future).await;

        let (exit_code, termination) = match timeout_result {
            Ok(Ok(code)) => (
                code,
                classify_exit(code, start_time.elapsed(), profile.timeout_seconds),
            ),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(
                    timeout_seconds = profile.timeout_seconds,
                    "In-container timeout did not fire, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(error = %e, "Failed to kill timed-out container");
                }
                (TIMEOUT_EXIT_CODE, Termination::TimedOut)
            }
        };

        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        if stdout.dropped() + stderr.dropped() > 0 {
            debug!(
                dropped_bytes = stdout.dropped() + stderr.dropped(),
                "Output exceeded capture limit"
            );
        }

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
