//! Build process port.
//!
//! The supervisor talks to the external build through these traits so the
//! monitoring loop can be driven by a real child process or a test double.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Everything needed to start the external build.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// stdout and stderr are appended here
    pub log_path: PathBuf,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when terminated by a signal
    pub code: Option<i32>,
}

impl ProcessExit {
    pub const fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub const fn signaled() -> Self {
        Self { code: None }
    }

    /// Exit code, with -1 standing in for signal termination.
    pub fn code_or_signal(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running build process, owned by exactly one supervisor.
#[async_trait]
pub trait ManagedProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> DomainResult<Option<ProcessExit>>;

    /// Ask the process to stop (SIGTERM on unix).
    fn terminate(&mut self) -> DomainResult<()>;

    /// Force the process to stop (SIGKILL) and reap it.
    async fn kill(&mut self) -> DomainResult<()>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> DomainResult<ProcessExit>;
}

/// Starts build processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> DomainResult<Box<dyn ManagedProcess>>;
}
