//! Execution supervision
//!
//! Starts a provisioned container and races its exit against a deadline.
//! Whatever happens (clean exit, crash, timeout, daemon error, or the
//! caller dropping the future) the container is stopped and removed and
//! the code file deleted before the instance is considered done.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, SandboxError};
use crate::provision::SandboxInstance;
use crate::runtime::ContainerRuntime;

/// Lifecycle of one sandbox. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Created,
    Started,
    Running,
    Completed,
    TimedOut,
    Failed,
    Removed,
}

/// Exit status and output of a container that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    /// -1 when the daemon reported something that doesn't fit an i32
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// What went wrong while tearing a sandbox down. Never fatal.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub container_removed: bool,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug)]
pub struct Supervised {
    pub execution_id: String,
    pub result: Result<RawResult, SandboxError>,
    pub cleanup: CleanupReport,
    pub final_state: SandboxState,
}

pub struct Supervisor {
    runtime: Arc<dyn ContainerRuntime>,
    max_output_bytes: usize,
}

impl Supervisor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, max_output_bytes: usize) -> Self {
        Self {
            runtime,
            max_output_bytes,
        }
    }

    /// Run the instance to completion or deadline, then tear it down.
    ///
    /// Returns only after stop/remove/unlink have been attempted. Cleanup
    /// problems land in [`Supervised::cleanup`] and never replace `result`.
    pub async fn run(&self, mut instance: SandboxInstance, timeout: Duration) -> Supervised {
        let mut guard = CleanupGuard::new(
            self.runtime.clone(),
            instance.container_name.clone(),
            instance.code_file.clone(),
        );

        let result = self.drive(&mut instance, timeout).await;
        instance.state = match &result {
            Ok(_) => SandboxState::Completed,
            Err(e) if e.is_timeout() => SandboxState::TimedOut,
            Err(_) => SandboxState::Failed,
        };

        let cleanup = cleanup(
            self.runtime.as_ref(),
            &instance.container_name,
            &instance.code_file,
        )
        .await;
        guard.disarm();

        if cleanup.container_removed {
            instance.state = SandboxState::Removed;
        }

        debug!(
            execution_id = %instance.id,
            state = ?instance.state,
            cleanup_errors = cleanup.errors.len(),
            "Sandbox torn down"
        );

        Supervised {
            execution_id: instance.id,
            result,
            cleanup,
            final_state: instance.state,
        }
    }

    async fn drive(
        &self,
        instance: &mut SandboxInstance,
        timeout: Duration,
    ) -> Result<RawResult, SandboxError> {
        let name = instance.container_name.clone();
        let execution_id = instance.id.clone();
        let stdin = instance.stdin.take();

        // Start sits inside the deadline too: writing stdin to a program
        // that never reads it blocks once the pipe is full.
        let execution = async {
            self.runtime
                .start(&name, stdin)
                .await
                .map_err(SandboxError::Start)?;

            info!(
                execution_id = %execution_id,
                container = %name,
                timeout_ms = timeout.as_millis() as u64,
                "Sandbox started"
            );

            let code = self.runtime.wait(&name).await.map_err(SandboxError::Wait)?;
            let output = self
                .runtime
                .logs(&name, self.max_output_bytes)
                .await
                .map_err(SandboxError::Logs)?
                .trimmed();

            Ok(RawResult {
                exit_code: i32::try_from(code).unwrap_or(-1),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        };

        instance.state = SandboxState::Started;
        tokio::select! {
            result = execution => result,
            _ = tokio::time::sleep(timeout) => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(execution_id = %execution_id, container = %name, timeout_ms, "Deadline hit, killing sandbox");

                if let Err(e) = self.runtime.stop(&name, 0).await {
                    if !e.is_benign_for_cleanup() {
                        warn!(container = %name, error = %e, "Kill after timeout failed");
                    }
                }

                // Whatever the program printed before it was killed
                let partial = match self.runtime.logs(&name, self.max_output_bytes).await {
                    Ok(output) => output.trimmed(),
                    Err(e) => {
                        debug!(container = %name, error = %e, "No partial output after timeout");
                        Default::default()
                    }
                };

                Err(SandboxError::Timeout {
                    timeout_ms,
                    stdout: partial.stdout,
                    stderr: partial.stderr,
                })
            }
        }
    }
}

/// Stop (idempotent), force-remove, unlink. Every step runs even if an
/// earlier one failed.
pub(crate) async fn cleanup(
    runtime: &dyn ContainerRuntime,
    container: &str,
    code_file: &Path,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    let stop_error = match runtime.stop(container, 0).await {
        Ok(()) => None,
        Err(e) if e.is_benign_for_cleanup() => None,
        Err(e) => Some(e),
    };

    match runtime.remove(container).await {
        Ok(()) | Err(RuntimeError::NotFound(_)) => report.container_removed = true,
        Err(e) => {
            if let Some(stop) = stop_error {
                warn!(container = %container, error = %stop, "Failed to stop sandbox");
                report.errors.push(format!("stop {container}: {stop}"));
            }
            warn!(container = %container, error = %e, "Failed to remove sandbox");
            report.errors.push(format!("remove {container}: {e}"));
        }
    }

    match tokio::fs::remove_file(code_file).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %code_file.display(), error = %e, "Failed to delete code file");
            report
                .errors
                .push(format!("delete {}: {e}", code_file.display()));
        }
    }

    report
}

/// Runs cleanup on a spawned task if the supervising future is dropped
/// before it finished tearing down.
struct CleanupGuard {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    code_file: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, container: String, code_file: PathBuf) -> Self {
        Self {
            runtime,
            container,
            code_file,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.container, "No runtime to clean up on; leaving sandbox for the reclaimer");
            return;
        };

        let runtime = self.runtime.clone();
        let container = std::mem::take(&mut self.container);
        let code_file = std::mem::take(&mut self.code_file);
        handle.spawn(async move {
            let report = cleanup(runtime.as_ref(), &container, &code_file).await;
            if report.is_clean() {
                debug!(container = %container, "Cleaned up abandoned sandbox");
            } else {
                warn!(
                    container = %container,
                    errors = ?report.errors,
                    "Abandoned sandbox cleanup incomplete; leaving it for the reclaimer"
                );
            }
        });
    }
}
