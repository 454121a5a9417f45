//! Child process adapter over `tokio::process`.
//!
//! stdout and stderr of the build are appended to its log file. Graceful
//! termination sends SIGTERM through `nix`; forced kills use tokio's
//! `Child::kill`, which also reaps the process.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{LaunchSpec, ManagedProcess, ProcessExit, ProcessLauncher};

/// Spawns build commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> DomainResult<Box<dyn ManagedProcess>> {
        let stdout = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)
            .map_err(|e| {
                DomainError::ProcessError(format!(
                    "Cannot open log {}: {e}",
                    spec.log_path.display()
                ))
            })?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| DomainError::ProcessError(format!("Cannot share log handle: {e}")))?;

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DomainError::ProcessError(format!("Failed to spawn {}: {e}", spec.program))
            })?;

        info!(
            program = %spec.program,
            args = ?spec.args,
            pid = ?child.id(),
            cwd = %spec.working_dir.display(),
            "Spawned build process"
        );

        Ok(Box::new(ChildProcess { child }))
    }
}

/// A spawned build process.
pub struct ChildProcess {
    child: Child,
}

fn to_exit(status: ExitStatus) -> ProcessExit {
    ProcessExit {
        code: status.code(),
    }
}

#[async_trait]
impl ManagedProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> DomainResult<Option<ProcessExit>> {
        self.child
            .try_wait()
            .map(|status| status.map(to_exit))
            .map_err(|e| DomainError::ProcessError(format!("Failed to poll build process: {e}")))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> DomainResult<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            debug!("Build process already exited, nothing to terminate");
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| DomainError::ProcessError(format!("PID out of range: {pid}")))?;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(DomainError::ProcessError(format!("Failed to send SIGTERM: {e}"))),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> DomainResult<()> {
        self.child
            .start_kill()
            .map_err(|e| DomainError::ProcessError(format!("Failed to stop build process: {e}")))
    }

    async fn kill(&mut self) -> DomainResult<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(DomainError::ProcessError(format!("Failed to kill build process: {e}"))),
        }
    }

    async fn wait(&mut self) -> DomainResult<ProcessExit> {
        self.child
            .wait()
            .await
            .map(to_exit)
            .map_err(|e| DomainError::ProcessError(format!("Failed to wait for build process: {e}")))
    }
}
