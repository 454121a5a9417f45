//! Common test utilities for integration tests
//!
//! Provides a scripted build process, a launcher that hands it out, a
//! notifier that records deliveries, and helpers for wiring a service over
//! temporary directories.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use buildmaster::adapters::storage::JsonBuildStore;
use buildmaster::domain::errors::{DomainError, DomainResult, NotifyError};
use buildmaster::domain::models::{BuildId, BuildRecord, BuildRequest, BuildStatus};
use buildmaster::domain::ports::{
    BuildStore, LaunchSpec, ManagedProcess, Notifier, ProcessExit, ProcessLauncher,
};
use buildmaster::services::{BuildService, BuildServiceSettings, SupervisorSettings, WorkerTracker};

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Millisecond-scale supervisor timings.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        stall_timeout: Duration::from_millis(300),
        health_check_interval: Duration::from_millis(20),
        long_running_warning: Duration::from_secs(60),
        cancel_grace: Duration::from_millis(100),
    }
}

/// Shared view of a [`FakeProcess`], kept by the test after the process
/// itself moves into the supervisor.
#[derive(Clone, Default)]
pub struct FakeHandle {
    exit: Arc<Mutex<Option<ProcessExit>>>,
    kills: Arc<AtomicUsize>,
    terminates: Arc<AtomicUsize>,
    ignore_terminate: Arc<AtomicBool>,
    fail_wait: Arc<AtomicBool>,
}

impl FakeHandle {
    /// Make the process exit with `code` on the next poll.
    pub fn exit_with(&self, code: i32) {
        *self.exit.lock().unwrap() = Some(ProcessExit::code(code));
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }

    /// SIGTERM is received but the process keeps running.
    pub fn ignore_terminate(&self) {
        self.ignore_terminate.store(true, Ordering::SeqCst);
    }

    /// `try_wait` starts failing, as if the child could no longer be observed.
    pub fn fail_wait(&self) {
        self.fail_wait.store(true, Ordering::SeqCst);
    }

    pub fn has_exited(&self) -> bool {
        self.exit.lock().unwrap().is_some()
    }
}

/// Scripted stand-in for the external build process.
pub struct FakeProcess {
    handle: FakeHandle,
}

impl FakeProcess {
    pub fn new() -> (Self, FakeHandle) {
        let handle = FakeHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn try_wait(&mut self) -> DomainResult<Option<ProcessExit>> {
        if self.handle.fail_wait.load(Ordering::SeqCst) {
            return Err(DomainError::ProcessError("wait failed".to_string()));
        }
        Ok(*self.handle.exit.lock().unwrap())
    }

    fn terminate(&mut self) -> DomainResult<()> {
        self.handle.terminates.fetch_add(1, Ordering::SeqCst);
        if !self.handle.ignore_terminate.load(Ordering::SeqCst) {
            let mut exit = self.handle.exit.lock().unwrap();
            exit.get_or_insert(ProcessExit::signaled());
        }
        Ok(())
    }

    async fn kill(&mut self) -> DomainResult<()> {
        self.handle.kills.fetch_add(1, Ordering::SeqCst);
        let mut exit = self.handle.exit.lock().unwrap();
        exit.get_or_insert(ProcessExit::signaled());
        Ok(())
    }

    async fn wait(&mut self) -> DomainResult<ProcessExit> {
        loop {
            if let Some(exit) = *self.handle.exit.lock().unwrap() {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Hands out one [`FakeProcess`] per launch and remembers what it was asked
/// to run.
#[derive(Default)]
pub struct FakeLauncher {
    handles: Mutex<Vec<FakeHandle>>,
    specs: Mutex<Vec<LaunchSpec>>,
    fail_with: Mutex<Option<String>>,
}

impl FakeLauncher {
    pub fn failing(reason: &str) -> Self {
        let launcher = Self::default();
        *launcher.fail_with.lock().unwrap() = Some(reason.to_string());
        launcher
    }

    /// Handle of the most recently launched process.
    pub fn last_handle(&self) -> FakeHandle {
        self.handles
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("nothing launched")
    }

    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.specs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> DomainResult<Box<dyn ManagedProcess>> {
        self.specs.lock().unwrap().push(spec.clone());
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(DomainError::ProcessError(reason));
        }
        let (process, handle) = FakeProcess::new();
        self.handles.lock().unwrap().push(handle);
        Ok(Box::new(process))
    }
}

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Started(BuildId),
    Completed { build_id: BuildId, success: bool },
    Stalled { build_id: BuildId, output: String },
}

#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingNotifier {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn build_started(
        &self,
        build_id: BuildId,
        _config: &BuildRequest,
    ) -> Result<(), NotifyError> {
        self.deliveries.lock().unwrap().push(Delivery::Started(build_id));
        Ok(())
    }

    async fn build_completed(
        &self,
        build_id: BuildId,
        success: bool,
        _message: &str,
        _error: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.deliveries
            .lock()
            .unwrap()
            .push(Delivery::Completed { build_id, success });
        Ok(())
    }

    async fn build_stalled(&self, build_id: BuildId, last_output: &str) -> Result<(), NotifyError> {
        self.deliveries.lock().unwrap().push(Delivery::Stalled {
            build_id,
            output: last_output.to_string(),
        });
        Ok(())
    }
}

/// A service over temporary directories with fake process and notifier.
pub struct TestHarness {
    pub dir: TempDir,
    pub store: Arc<JsonBuildStore>,
    pub launcher: Arc<FakeLauncher>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: BuildService,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_launcher(FakeLauncher::default(), fast_settings()).await
    }

    pub async fn with_launcher(launcher: FakeLauncher, supervisor: SupervisorSettings) -> Self {
        let dir = temp_dir();
        let store = Arc::new(JsonBuildStore::open(dir.path().join("data")).await.unwrap());
        let launcher = Arc::new(launcher);
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = test_settings(dir.path(), "pnpm", vec!["run".to_string()], supervisor);
        let service = BuildService::new(
            store.clone(),
            launcher.clone(),
            notifier.clone(),
            WorkerTracker::new(Duration::from_secs(300), dir.path().join("status")),
            settings,
        );
        Self {
            dir,
            store,
            launcher,
            notifier,
            service,
        }
    }

    pub fn log_path(&self, build_id: BuildId) -> PathBuf {
        self.service.settings().log_path(build_id)
    }

    /// Append text to a build's log, as the build script would.
    pub fn append_log(&self, build_id: BuildId, text: &str) {
        append(&self.log_path(build_id), text);
    }

    /// Poll until the build leaves the active states.
    pub async fn wait_terminal(&self, build_id: BuildId) -> BuildRecord {
        wait_terminal(self.store.as_ref(), build_id).await
    }
}

pub fn test_settings(
    root: &Path,
    program: &str,
    args: Vec<String>,
    supervisor: SupervisorSettings,
) -> BuildServiceSettings {
    let working_dir = root.join("app");
    std::fs::create_dir_all(&working_dir).unwrap();
    BuildServiceSettings {
        working_dir,
        log_dir: root.join("logs"),
        program: program.to_string(),
        args,
        supervisor,
    }
}

pub fn append(path: &Path, text: &str) {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

/// Save a RUNNING record directly, bypassing the service.
pub async fn running_record(store: &dyn BuildStore) -> BuildRecord {
    let mut record = BuildRecord::pending(BuildId::new(), BuildRequest::default());
    record.transition_to(BuildStatus::Running).unwrap();
    store.save(&record).await.unwrap();
    record
}

pub async fn wait_terminal(store: &dyn BuildStore, build_id: BuildId) -> BuildRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let record = store.load(build_id).await.unwrap().expect("record exists");
        if !record.is_active() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "build {build_id} still {} after 10s",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a condition to be true with timeout
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
