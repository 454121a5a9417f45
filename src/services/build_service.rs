//! Build orchestration.
//!
//! `BuildService` starts builds, hands each process to its own supervisor
//! task and commits the terminal state when supervision ends. It is the only
//! writer of terminal states; every terminal write goes through
//! [`BuildService::commit_terminal`], which ignores records that are no
//! longer active.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{BuildError, DomainError, NotifyError};
use crate::domain::models::{BuildId, BuildRecord, BuildRequest, BuildStatus, Config, ErrorType};
use crate::domain::ports::{BuildStore, LaunchSpec, Notifier, ProcessExit, ProcessLauncher};
use crate::services::build_env::{build_environment, log_header, resolve_workers};
use crate::services::build_supervisor::{
    read_log, BuildSupervisor, CancelRequest, SupervisorOutcome, SupervisorSettings,
};
use crate::services::exit_classifier::{classify_exit, ExitClassification};
use crate::services::log_parser::{tail_lines, INITIAL_STEP_NAME};
use crate::services::worker_tracker::WorkerTracker;

pub type BuildResult<T> = Result<T, BuildError>;

/// Build output directory measured after each build.
const BUILD_OUTPUT_DIR: &str = ".next";

const CANCEL_QUEUE: usize = 4;

/// Where and how builds run.
#[derive(Debug, Clone)]
pub struct BuildServiceSettings {
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub supervisor: SupervisorSettings,
}

impl BuildServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            working_dir: PathBuf::from(&config.paths.working_dir),
            log_dir: PathBuf::from(&config.paths.log_dir),
            program: config.build.program.clone(),
            args: config.build.args.clone(),
            supervisor: SupervisorSettings::from(&config.monitor),
        }
    }

    pub fn log_path(&self, build_id: BuildId) -> PathBuf {
        self.log_dir.join(format!("{build_id}.log"))
    }
}

/// Orchestrates build lifecycles.
#[derive(Clone)]
pub struct BuildService {
    store: Arc<dyn BuildStore>,
    launcher: Arc<dyn ProcessLauncher>,
    notifier: Arc<dyn Notifier>,
    workers: WorkerTracker,
    settings: Arc<BuildServiceSettings>,
    cancels: Arc<Mutex<HashMap<BuildId, mpsc::Sender<CancelRequest>>>>,
    start_lock: Arc<Mutex<()>>,
}

impl BuildService {
    pub fn new(
        store: Arc<dyn BuildStore>,
        launcher: Arc<dyn ProcessLauncher>,
        notifier: Arc<dyn Notifier>,
        workers: WorkerTracker,
        settings: BuildServiceSettings,
    ) -> Self {
        Self {
            store,
            launcher,
            notifier,
            workers,
            settings: Arc::new(settings),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            start_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn settings(&self) -> &BuildServiceSettings {
        &self.settings
    }

    pub fn workers(&self) -> &WorkerTracker {
        &self.workers
    }

    /// Start a build and return its RUNNING record. Supervision continues on
    /// a background task.
    pub async fn start(&self, request: BuildRequest) -> BuildResult<BuildRecord> {
        request
            .validate()
            .map_err(|e| BuildError::InvalidRequest(e.to_string()))?;

        let _guard = self.start_lock.lock().await;
        if let Some(active) = self.store.find_active().await? {
            return Err(BuildError::AlreadyActive(active.build_id));
        }

        let build_id = BuildId::new();
        let workers = resolve_workers(&request);
        let env = build_environment(build_id, &request, workers);
        let log_path = self.settings.log_path(build_id);

        self.workers.clear().await;

        let mut record = BuildRecord::pending(build_id, request.clone());
        record.log_file = Some(log_path.display().to_string());
        record.worker_count = Some(workers);
        self.store.save(&record).await?;

        let mut args = self.settings.args.clone();
        args.push(env.script.to_string());
        let command = std::iter::once(self.settings.program.as_str())
            .chain(self.settings.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        info!(
            build_id = %build_id,
            mode = %request.build_mode,
            script = env.script,
            workers,
            "Starting build"
        );

        let header = log_header(build_id, &request, &env, &command, &self.settings.working_dir);
        if let Err(e) = write_log_header(&log_path, &header).await {
            return Err(self.fail_start(build_id, format!("Cannot write build log: {e}")).await);
        }

        let spec = LaunchSpec {
            program: self.settings.program.clone(),
            args,
            working_dir: self.settings.working_dir.clone(),
            env: env.into_pairs(),
            log_path: log_path.clone(),
        };

        let mut process = match self.launcher.launch(&spec).await {
            Ok(process) => process,
            Err(e) => return Err(self.fail_start(build_id, e.to_string()).await),
        };

        record.transition_to(BuildStatus::Running)?;
        record.current_step = INITIAL_STEP_NAME.to_string();
        record.step_index = Some(0);
        record.message = Some("Build started".to_string());
        if let Err(e) = self.store.save(&record).await {
            if let Err(kill_err) = process.kill().await {
                warn!(build_id = %build_id, error = %kill_err, "Failed to kill unrecorded build");
            }
            return Err(e.into());
        }

        let (cancel_tx, cancel_rx) = mpsc::channel(CANCEL_QUEUE);
        self.cancels.lock().await.insert(build_id, cancel_tx);

        let notifier = Arc::clone(&self.notifier);
        self.dispatch("build_started", async move {
            notifier.build_started(build_id, &request).await
        });

        let supervisor = BuildSupervisor::new(
            build_id,
            process,
            Arc::clone(&self.store),
            log_path,
            self.settings.supervisor.clone(),
            cancel_rx,
        );
        let service = self.clone();
        tokio::spawn(async move {
            let outcome = supervisor.run().await;
            service.finish(build_id, outcome).await;
        });

        Ok(record)
    }

    pub async fn status(&self, build_id: BuildId) -> BuildResult<BuildRecord> {
        self.store
            .load(build_id)
            .await?
            .ok_or(BuildError::NotFound(build_id))
    }

    /// Last `lines` lines of the build log.
    pub async fn logs(&self, build_id: BuildId, lines: usize) -> BuildResult<String> {
        let path = self.settings.log_path(build_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(tail_lines(&String::from_utf8_lossy(&bytes), lines)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BuildError::NotFound(build_id)),
            Err(e) => Err(DomainError::from(e).into()),
        }
    }

    pub async fn history(&self, limit: usize) -> BuildResult<Vec<BuildRecord>> {
        Ok(self.store.list_recent(limit).await?)
    }

    pub async fn active_build(&self) -> BuildResult<Option<BuildRecord>> {
        Ok(self.store.find_active().await?)
    }

    /// Cancel a running build. Returns once CANCELLED is committed.
    pub async fn kill(&self, build_id: BuildId) -> BuildResult<()> {
        let record = self.status(build_id).await?;
        if !record.is_active() {
            return Err(BuildError::NotCancellable {
                status: record.status,
            });
        }

        let sender = self.cancels.lock().await.get(&build_id).cloned();
        let Some(sender) = sender else {
            return Err(BuildError::ProcessNotRunning);
        };

        let (request, reply) = CancelRequest::new();
        if sender.send(request).await.is_err() {
            return Err(self.cancel_rejection(build_id).await);
        }

        match reply.await {
            Ok(result) => result,
            Err(_) => Err(self.cancel_rejection(build_id).await),
        }
    }

    /// Finalize a record if it is still active. Returns the committed record,
    /// or `None` when another terminal state got there first.
    pub async fn commit_terminal(
        &self,
        build_id: BuildId,
        status: BuildStatus,
        apply: impl FnOnce(&mut BuildRecord) + Send,
    ) -> BuildResult<Option<BuildRecord>> {
        let mut record = self.status(build_id).await?;
        if !record.is_active() {
            debug!(build_id = %build_id, status = %record.status, "Build already finalized");
            return Ok(None);
        }

        record.transition_to(status)?;
        apply(&mut record);
        record.mark_completed(Utc::now());
        self.store.save(&record).await?;

        info!(
            build_id = %build_id,
            status = %record.status,
            error_type = ?record.error_type,
            duration_secs = ?record.duration_seconds,
            "Build finished"
        );
        Ok(Some(record))
    }

    /// Fail every persisted active build that has no supervisor in this
    /// process. Run once at startup.
    pub async fn recover_interrupted(&self) -> BuildResult<usize> {
        let records = self.store.list_recent(usize::MAX).await?;
        let supervised = self.cancels.lock().await.keys().copied().collect::<Vec<_>>();
        let mut recovered = 0;

        for record in records
            .into_iter()
            .filter(|r| r.is_active() && !supervised.contains(&r.build_id))
        {
            let message = "Build interrupted - dashboard restarted while the build was running";
            let committed = self
                .commit_terminal(record.build_id, BuildStatus::Error, |r| {
                    r.error_type = Some(ErrorType::BuildError);
                    r.message = Some(message.to_string());
                    r.error = Some(message.to_string());
                })
                .await?;
            if committed.is_some() {
                warn!(build_id = %record.build_id, "Marked interrupted build as failed");
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    async fn finish(&self, build_id: BuildId, outcome: SupervisorOutcome) {
        if let SupervisorOutcome::Cancelled { reply } = outcome {
            let result = self
                .commit_terminal(build_id, BuildStatus::Cancelled, |r| {
                    r.message = Some("Build was cancelled by user".to_string());
                })
                .await
                .map(|_| ());
            self.cancels.lock().await.remove(&build_id);
            if reply.send(result).is_err() {
                debug!(build_id = %build_id, "Cancel requester went away");
            }
            return;
        }

        let result = match outcome {
            SupervisorOutcome::Exited { exit } => self.finish_exited(build_id, exit).await,
            SupervisorOutcome::TimedOut { elapsed } => self.finish_timed_out(build_id, elapsed.as_secs()).await,
            SupervisorOutcome::Stalled {
                silent_for,
                elapsed,
                tail,
            } => {
                self.finish_stalled(build_id, silent_for.as_secs(), elapsed.as_secs(), tail)
                    .await
            }
            SupervisorOutcome::OutOfMemory { .. } => self.finish_out_of_memory(build_id).await,
            SupervisorOutcome::ProcessFailed { reason } => self.finish_lost(build_id, reason).await,
            SupervisorOutcome::Cancelled { .. } => Ok(()),
        };

        self.cancels.lock().await.remove(&build_id);

        if let Err(e) = result {
            error!(build_id = %build_id, error = %e, "Failed to finalize build");
        }
    }

    async fn finish_exited(&self, build_id: BuildId, exit: ProcessExit) -> BuildResult<()> {
        let (_, log) = read_log(&self.settings.log_path(build_id)).await;
        let build_size_mb = directory_size_mb(&self.settings.working_dir.join(BUILD_OUTPUT_DIR)).await;

        let committed = match classify_exit(exit, &log) {
            ExitClassification::Success { timings } => {
                self.commit_terminal(build_id, BuildStatus::Success, |r| {
                    r.message = Some("Build completed successfully".to_string());
                    r.progress = 100.0;
                    r.current_step = "COMPLETE".to_string();
                    r.build_size_mb = build_size_mb;
                    if !timings.is_empty() {
                        r.timings = Some(timings);
                    }
                })
                .await?
            }
            ExitClassification::Failure {
                error_type,
                message,
                error,
            } => {
                self.commit_terminal(build_id, BuildStatus::Error, |r| {
                    r.error_type = Some(error_type);
                    r.message = Some(message);
                    r.error = Some(error);
                    r.build_size_mb = build_size_mb;
                })
                .await?
            }
        };

        if let Some(record) = committed {
            let success = record.status == BuildStatus::Success;
            let message = record.message.clone().unwrap_or_default();
            let error = record.error.clone();
            let notifier = Arc::clone(&self.notifier);
            self.dispatch("build_completed", async move {
                notifier
                    .build_completed(build_id, success, &message, error.as_deref())
                    .await
            });
        }
        Ok(())
    }

    async fn finish_timed_out(&self, build_id: BuildId, elapsed_secs: u64) -> BuildResult<()> {
        let limit_minutes = self.settings.supervisor.timeout.as_secs() / 60;
        let committed = self
            .commit_terminal(build_id, BuildStatus::Error, |r| {
                r.error_type = Some(ErrorType::Timeout);
                r.message = Some(format!(
                    "Build exceeded maximum time limit ({limit_minutes} minutes)"
                ));
                r.error = Some(format!(
                    "Build timeout after {elapsed_secs} seconds.\n\n\
                     Suggestions:\n\
                     1. Use 'build:phased' for large projects\n\
                     2. Increase memory with --max-old-space-size\n\
                     3. Check for infinite loops in build scripts\n\
                     4. Use 'build:quick' for faster iteration"
                ));
                r.elapsed_seconds = Some(elapsed_secs);
            })
            .await?;

        if committed.is_some() {
            let notifier = Arc::clone(&self.notifier);
            let note = format!("Build timed out after {elapsed_secs} seconds");
            self.dispatch("build_stalled", async move {
                notifier.build_stalled(build_id, &note).await
            });
        }
        Ok(())
    }

    async fn finish_stalled(
        &self,
        build_id: BuildId,
        silent_secs: u64,
        elapsed_secs: u64,
        tail: String,
    ) -> BuildResult<()> {
        let stall_minutes = self.settings.supervisor.stall_timeout.as_secs() / 60;
        let committed = self
            .commit_terminal(build_id, BuildStatus::Stalled, |r| {
                r.error_type = Some(ErrorType::Stalled);
                r.message = Some(format!(
                    "Build stalled - no output for {stall_minutes} minutes"
                ));
                r.error = Some(format!(
                    "Build appears to be stuck.\n\n\
                     Last output was {silent_secs} seconds ago.\n\
                     Total elapsed time: {elapsed_secs} seconds.\n\n\
                     Suggestions:\n\
                     1. Check memory usage - may be swapping\n\
                     2. Use 'build:phased' for memory-safe builds\n\
                     3. Reduce worker count\n\
                     4. Check for network issues if fetching packages"
                ));
                r.elapsed_seconds = Some(elapsed_secs);
            })
            .await?;

        if committed.is_some() {
            let notifier = Arc::clone(&self.notifier);
            self.dispatch("build_stalled", async move {
                notifier.build_stalled(build_id, &tail).await
            });
        }
        Ok(())
    }

    async fn finish_out_of_memory(&self, build_id: BuildId) -> BuildResult<()> {
        let committed = self
            .commit_terminal(build_id, BuildStatus::Error, |r| {
                r.error_type = Some(ErrorType::OutOfMemory);
                r.message = Some("Build crashed - out of memory".to_string());
                r.error = Some(
                    "Memory exhausted during build.\n\n\
                     Suggestions:\n\
                     1. Increase --max-old-space-size (current may be too low)\n\
                     2. Use 'build:phased' for memory-safe builds\n\
                     3. Reduce parallel workers\n\
                     4. Close other applications on the server"
                        .to_string(),
                );
            })
            .await?;

        if let Some(record) = committed {
            self.notify_failure(build_id, &record);
        }
        Ok(())
    }

    async fn finish_lost(&self, build_id: BuildId, reason: String) -> BuildResult<()> {
        let committed = self
            .commit_terminal(build_id, BuildStatus::Error, |r| {
                r.error_type = Some(ErrorType::BuildError);
                r.message = Some(format!("Build error: {reason}"));
                r.error = Some(reason);
            })
            .await?;

        if let Some(record) = committed {
            self.notify_failure(build_id, &record);
        }
        Ok(())
    }

    /// Record a start failure and build the error returned to the caller.
    async fn fail_start(&self, build_id: BuildId, reason: String) -> BuildError {
        error!(build_id = %build_id, reason = %reason, "Failed to start build");

        let message = format!("Failed to start build: {reason}");
        match self
            .commit_terminal(build_id, BuildStatus::Error, |r| {
                r.error_type = Some(ErrorType::BuildError);
                r.message = Some(message.clone());
                r.error = Some(reason.clone());
            })
            .await
        {
            Ok(Some(record)) => self.notify_failure(build_id, &record),
            Ok(None) => {}
            Err(e) => warn!(build_id = %build_id, error = %e, "Failed to record start failure"),
        }

        BuildError::SpawnFailed { build_id, reason }
    }

    async fn cancel_rejection(&self, build_id: BuildId) -> BuildError {
        match self.store.load(build_id).await {
            Ok(Some(record)) if !record.is_active() => BuildError::NotCancellable {
                status: record.status,
            },
            _ => BuildError::ProcessNotRunning,
        }
    }

    fn notify_failure(&self, build_id: BuildId, record: &BuildRecord) {
        let message = record.message.clone().unwrap_or_default();
        let error = record.error.clone();
        let notifier = Arc::clone(&self.notifier);
        self.dispatch("build_completed", async move {
            notifier
                .build_completed(build_id, false, &message, error.as_deref())
                .await
        });
    }

    /// Deliver a notification off the build path. Failures are only logged.
    fn dispatch<F>(&self, event: &'static str, delivery: F)
    where
        F: Future<Output = Result<(), NotifyError>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = delivery.await {
                warn!(event, error = %e, "Notification failed");
            }
        });
    }
}

async fn write_log_header(path: &Path, header: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(header.as_bytes()).await?;
    file.flush().await
}

/// Recursive size of a directory in megabytes, rounded to two decimals.
/// `None` when the directory is missing or cannot be walked.
pub async fn directory_size_mb(dir: &Path) -> Option<f64> {
    if !tokio::fs::metadata(dir).await.ok()?.is_dir() {
        return None;
    }

    let mut total: u64 = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await.ok()?;
        while let Some(entry) = entries.next_entry().await.ok()? {
            let file_type = entry.file_type().await.ok()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata().await.ok()?.len();
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let megabytes = total as f64 / (1024.0 * 1024.0);
    Some((megabytes * 100.0).round() / 100.0)
}
