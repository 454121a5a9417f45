//! Process supervision loop for one build.
//!
//! The supervisor owns the child process. Every poll it checks, in order:
//! hard timeout, log progress, output stall, out-of-memory (on the health
//! interval) and finally process exit. At most one terminal outcome is
//! produced per tick. Cancellation arrives over a channel and is handled
//! between ticks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::domain::errors::BuildError;
use crate::domain::models::{BuildId, BuildRecord, MonitorConfig};
use crate::domain::ports::{BuildStore, ManagedProcess, ProcessExit};
use crate::services::log_parser::{current_step_from_log, last_entry, tail_chars};
use crate::services::progress::{calculate_progress, round_progress};

/// Characters of output attached to a stall report.
pub const STALL_TAIL_CHARS: usize = 2000;

const OOM_PHRASES: [&str; 2] = ["heap out of memory", "fatal error"];

/// Timing knobs for the supervision loop.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub stall_timeout: Duration,
    pub health_check_interval: Duration,
    pub long_running_warning: Duration,
    pub cancel_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for SupervisorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            stall_timeout: Duration::from_secs(config.stall_timeout_secs),
            health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            long_running_warning: Duration::from_secs(config.long_running_warning_secs),
            cancel_grace: Duration::from_secs(config.cancel_grace_secs),
        }
    }
}

/// Reply channel for a cancellation; answered once CANCELLED is committed.
pub type CancelReply = oneshot::Sender<Result<(), BuildError>>;

/// Operator request to stop a running build.
#[derive(Debug)]
pub struct CancelRequest {
    pub reply: CancelReply,
}

impl CancelRequest {
    pub fn new() -> (Self, oneshot::Receiver<Result<(), BuildError>>) {
        let (reply, rx) = oneshot::channel();
        (Self { reply }, rx)
    }
}

/// Why supervision ended.
#[derive(Debug)]
pub enum SupervisorOutcome {
    /// The process exited on its own
    Exited { exit: ProcessExit },
    /// Killed after exceeding the hard timeout
    TimedOut { elapsed: Duration },
    /// Killed after the log stopped growing
    Stalled {
        silent_for: Duration,
        elapsed: Duration,
        tail: String,
    },
    /// Killed after a memory failure showed up in the log
    OutOfMemory { elapsed: Duration },
    /// Stopped on operator request
    Cancelled { reply: CancelReply },
    /// The process could no longer be observed
    ProcessFailed { reason: String },
}

impl SupervisorOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exited { .. } => "exited",
            Self::TimedOut { .. } => "timed_out",
            Self::Stalled { .. } => "stalled",
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::Cancelled { .. } => "cancelled",
            Self::ProcessFailed { .. } => "process_failed",
        }
    }
}

struct LoopState {
    started: Instant,
    last_size: usize,
    last_growth: Instant,
    last_health_check: Instant,
    last_step: Option<u32>,
    last_message: Option<String>,
}

/// Watches one build process until it reaches a terminal outcome.
pub struct BuildSupervisor {
    build_id: BuildId,
    process: Box<dyn ManagedProcess>,
    store: Arc<dyn BuildStore>,
    log_path: PathBuf,
    settings: SupervisorSettings,
    cancel_rx: mpsc::Receiver<CancelRequest>,
}

impl BuildSupervisor {
    pub fn new(
        build_id: BuildId,
        process: Box<dyn ManagedProcess>,
        store: Arc<dyn BuildStore>,
        log_path: PathBuf,
        settings: SupervisorSettings,
        cancel_rx: mpsc::Receiver<CancelRequest>,
    ) -> Self {
        Self {
            build_id,
            process,
            store,
            log_path,
            settings,
            cancel_rx,
        }
    }

    /// Run the loop. The record is updated while running; the terminal
    /// commit is left to the caller.
    pub async fn run(mut self) -> SupervisorOutcome {
        let now = Instant::now();
        let mut state = LoopState {
            started: now,
            last_size: 0,
            last_growth: now,
            last_health_check: now,
            last_step: None,
            last_message: None,
        };

        info!(
            build_id = %self.build_id,
            pid = ?self.process.pid(),
            log = %self.log_path.display(),
            "Supervising build"
        );

        loop {
            let cancel = tokio::select! {
                () = sleep(self.settings.poll_interval) => None,
                Some(request) = self.cancel_rx.recv() => Some(request),
            };

            if let Some(request) = cancel {
                info!(build_id = %self.build_id, "Cancellation requested");
                if let Ok(Some(exit)) = self.process.try_wait() {
                    info!(build_id = %self.build_id, code = ?exit.code, "Build already exited, rejecting cancellation");
                    let _ = request.reply.send(Err(BuildError::ProcessNotRunning));
                    return SupervisorOutcome::Exited { exit };
                }
                self.stop_gracefully().await;
                return SupervisorOutcome::Cancelled {
                    reply: request.reply,
                };
            }

            if let Some(outcome) = self.tick(&mut state).await {
                info!(build_id = %self.build_id, outcome = outcome.kind(), "Supervision finished");
                return outcome;
            }
        }
    }

    async fn tick(&mut self, state: &mut LoopState) -> Option<SupervisorOutcome> {
        let now = Instant::now();
        let elapsed = now - state.started;

        if elapsed > self.settings.timeout {
            warn!(
                build_id = %self.build_id,
                elapsed_secs = elapsed.as_secs(),
                "Build exceeded timeout, killing"
            );
            self.force_kill().await;
            return Some(SupervisorOutcome::TimedOut { elapsed });
        }

        let (size, content) = read_log(&self.log_path).await;
        self.record_progress(&content, elapsed, state).await;

        if size != state.last_size {
            state.last_size = size;
            state.last_growth = now;
        } else {
            let silent_for = now - state.last_growth;
            if silent_for > self.settings.stall_timeout {
                warn!(
                    build_id = %self.build_id,
                    silent_secs = silent_for.as_secs(),
                    "Build produced no output, killing"
                );
                self.force_kill().await;
                return Some(SupervisorOutcome::Stalled {
                    silent_for,
                    elapsed,
                    tail: tail_chars(&content, STALL_TAIL_CHARS).to_string(),
                });
            }
        }

        if now - state.last_health_check >= self.settings.health_check_interval {
            state.last_health_check = now;

            if looks_out_of_memory(&content) {
                warn!(build_id = %self.build_id, "Out of memory detected in build log, killing");
                self.force_kill().await;
                return Some(SupervisorOutcome::OutOfMemory { elapsed });
            }

            self.record_health(elapsed).await;
        }

        match self.process.try_wait() {
            Ok(Some(exit)) => Some(SupervisorOutcome::Exited { exit }),
            Ok(None) => None,
            Err(e) => {
                warn!(build_id = %self.build_id, error = %e, "Lost track of build process");
                self.force_kill().await;
                Some(SupervisorOutcome::ProcessFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn record_progress(&mut self, content: &str, elapsed: Duration, state: &mut LoopState) {
        let (step, step_name) = current_step_from_log(content);
        let message = last_entry(content).map(|entry| entry.message);

        if state.last_step == Some(step) && state.last_message == message {
            return;
        }
        state.last_step = Some(step);
        state.last_message.clone_from(&message);

        let progress = round_progress(calculate_progress(step, false));
        debug!(build_id = %self.build_id, step, progress, "Build progress");

        self.update_record(move |record| {
            record.current_step = step_name;
            record.step_index = Some(step);
            record.advance_progress(progress);
            if message.is_some() {
                record.message = message;
            }
            record.elapsed_seconds = Some(elapsed.as_secs());
        })
        .await;
    }

    async fn record_health(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs();
        let warning = (elapsed > self.settings.long_running_warning)
            .then(|| format!("Build running for {} minutes", secs / 60));

        self.update_record(move |record| {
            record.elapsed_seconds = Some(secs);
            if warning.is_some() {
                record.warning = warning;
            }
        })
        .await;
    }

    /// Apply a running update if the record is still active.
    async fn update_record(&mut self, apply: impl FnOnce(&mut BuildRecord) + Send) {
        match self.store.load(self.build_id).await {
            Ok(Some(mut record)) if record.is_active() => {
                apply(&mut record);
                if let Err(e) = self.store.save(&record).await {
                    warn!(build_id = %self.build_id, error = %e, "Failed to save build progress");
                }
            }
            Ok(Some(record)) => {
                debug!(build_id = %self.build_id, status = %record.status, "Record no longer active");
            }
            Ok(None) => warn!(build_id = %self.build_id, "Build record missing during supervision"),
            Err(e) => warn!(build_id = %self.build_id, error = %e, "Failed to load build record"),
        }
    }

    async fn force_kill(&mut self) {
        if let Err(e) = self.process.kill().await {
            warn!(build_id = %self.build_id, error = %e, "Failed to kill build process");
        }
    }

    /// SIGTERM, then SIGKILL if the process outlives the grace period.
    async fn stop_gracefully(&mut self) {
        if let Err(e) = self.process.terminate() {
            warn!(build_id = %self.build_id, error = %e, "Failed to send terminate signal");
        }

        match timeout(self.settings.cancel_grace, self.process.wait()).await {
            Ok(Ok(exit)) => {
                debug!(build_id = %self.build_id, code = ?exit.code, "Build process terminated");
            }
            Ok(Err(e)) => {
                warn!(build_id = %self.build_id, error = %e, "Error waiting for build process");
                self.force_kill().await;
            }
            Err(_) => {
                warn!(build_id = %self.build_id, "Build ignored terminate signal, forcing kill");
                self.force_kill().await;
            }
        }
    }
}

/// Byte size and lossily decoded text of the log. A missing log reads as empty.
pub async fn read_log(path: &std::path::Path) -> (usize, String) {
    match tokio::fs::read(path).await {
        Ok(bytes) => (bytes.len(), String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Build log not readable");
            (0, String::new())
        }
    }
}

pub fn looks_out_of_memory(content: &str) -> bool {
    let lowered = content.to_lowercase();
    OOM_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}
