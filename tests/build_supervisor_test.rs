//! Supervision loop behavior against a scripted process.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use buildmaster::adapters::storage::JsonBuildStore;
use buildmaster::domain::models::{BuildId, BuildStatus};
use buildmaster::domain::ports::BuildStore;
use buildmaster::services::{BuildSupervisor, CancelRequest, SupervisorOutcome, SupervisorSettings};

use common::{append, fast_settings, running_record, temp_dir, FakeHandle, FakeProcess};

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<JsonBuildStore>,
    build_id: BuildId,
    log_path: std::path::PathBuf,
    handle: FakeHandle,
    cancel_tx: mpsc::Sender<CancelRequest>,
    supervisor: BuildSupervisor,
}

async fn fixture(settings: SupervisorSettings) -> Fixture {
    let dir = temp_dir();
    let store = Arc::new(JsonBuildStore::open(dir.path().join("data")).await.unwrap());
    let record = running_record(store.as_ref()).await;
    let log_path = dir.path().join("build.log");
    let (process, handle) = FakeProcess::new();
    let (cancel_tx, cancel_rx) = mpsc::channel(4);

    let supervisor = BuildSupervisor::new(
        record.build_id,
        Box::new(process),
        store.clone(),
        log_path.clone(),
        settings,
        cancel_rx,
    );

    Fixture {
        _dir: dir,
        store,
        build_id: record.build_id,
        log_path,
        handle,
        cancel_tx,
        supervisor,
    }
}

#[tokio::test]
async fn test_silent_build_stalls_with_exactly_one_kill() {
    let settings = SupervisorSettings {
        stall_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let f = fixture(settings).await;
    append(&f.log_path, "[STEP 1] Stop PM2\n");

    let outcome = f.supervisor.run().await;

    match outcome {
        SupervisorOutcome::Stalled { silent_for, tail, .. } => {
            assert!(silent_for > Duration::from_millis(100));
            assert!(tail.contains("[STEP 1] Stop PM2"));
        }
        other => panic!("Expected stall, got {}", other.kind()),
    }
    assert_eq!(f.handle.kills(), 1);
    assert_eq!(f.handle.terminates(), 0);
}

#[tokio::test]
async fn test_timeout_wins_while_log_keeps_growing() {
    let settings = SupervisorSettings {
        timeout: Duration::from_millis(250),
        stall_timeout: Duration::from_millis(200),
        ..fast_settings()
    };
    let f = fixture(settings).await;

    let log_path = f.log_path.clone();
    let writer = tokio::spawn(async move {
        for i in 0..200 {
            append(&log_path, &format!("[INFO] compiling module {i}\n"));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let outcome = f.supervisor.run().await;
    writer.abort();

    assert!(
        matches!(outcome, SupervisorOutcome::TimedOut { elapsed } if elapsed > Duration::from_millis(250)),
        "Expected timeout, got {}",
        outcome.kind()
    );
    assert_eq!(f.handle.kills(), 1);
}

#[tokio::test]
async fn test_out_of_memory_in_log_kills_build() {
    let f = fixture(fast_settings()).await;
    append(
        &f.log_path,
        "[STEP 5] Build app\nFATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory\n",
    );

    let outcome = f.supervisor.run().await;

    assert!(
        matches!(outcome, SupervisorOutcome::OutOfMemory { .. }),
        "Expected out of memory, got {}",
        outcome.kind()
    );
    assert_eq!(f.handle.kills(), 1);
}

#[tokio::test]
async fn test_natural_exit_after_progress_updates() {
    let f = fixture(fast_settings()).await;
    append(&f.log_path, "[STEP 4] Install deps\n[STEP 5] Build app\n[INFO] Compiling pages\n");

    let handle = f.handle.clone();
    let store = f.store.clone();
    let build_id = f.build_id;
    let exiter = tokio::spawn(async move {
        // Exit only once the progress update has landed
        loop {
            let record = store.load(build_id).await.unwrap().unwrap();
            if record.step_index == Some(5) {
                handle.exit_with(0);
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let outcome = f.supervisor.run().await;
    exiter.await.unwrap();

    match outcome {
        SupervisorOutcome::Exited { exit } => assert_eq!(exit.code, Some(0)),
        other => panic!("Expected exit, got {}", other.kind()),
    }
    assert_eq!(f.handle.kills(), 0);

    // The supervisor never writes a terminal state
    let record = f.store.load(f.build_id).await.unwrap().unwrap();
    assert_eq!(record.status, BuildStatus::Running);
    assert_eq!(record.current_step, "Build app");
    assert_eq!(record.message.as_deref(), Some("Compiling pages"));
    assert!(record.progress > 0.0 && record.progress < 99.0);
}

#[tokio::test]
async fn test_cancel_terminates_gracefully() {
    let f = fixture(fast_settings()).await;
    let (request, _reply) = CancelRequest::new();
    f.cancel_tx.send(request).await.unwrap();

    let outcome = f.supervisor.run().await;

    assert!(matches!(outcome, SupervisorOutcome::Cancelled { .. }));
    assert_eq!(f.handle.terminates(), 1);
    assert_eq!(f.handle.kills(), 0);
}

#[tokio::test]
async fn test_cancel_escalates_to_kill_after_grace() {
    let f = fixture(fast_settings()).await;
    f.handle.ignore_terminate();
    let (request, _reply) = CancelRequest::new();
    f.cancel_tx.send(request).await.unwrap();

    let outcome = f.supervisor.run().await;

    assert!(matches!(outcome, SupervisorOutcome::Cancelled { .. }));
    assert_eq!(f.handle.terminates(), 1);
    assert_eq!(f.handle.kills(), 1);
}

#[tokio::test]
async fn test_unobservable_process_is_reported() {
    let f = fixture(fast_settings()).await;
    f.handle.fail_wait();

    let outcome = f.supervisor.run().await;

    match outcome {
        SupervisorOutcome::ProcessFailed { reason } => assert!(reason.contains("wait failed")),
        other => panic!("Expected process failure, got {}", other.kind()),
    }
    assert_eq!(f.handle.kills(), 1);
}

#[tokio::test]
async fn test_long_running_build_gets_warning() {
    let settings = SupervisorSettings {
        long_running_warning: Duration::from_millis(50),
        ..fast_settings()
    };
    let f = fixture(settings).await;
    let log_path = f.log_path.clone();
    let handle = f.handle.clone();
    let store = f.store.clone();
    let build_id = f.build_id;

    let driver = tokio::spawn(async move {
        for i in 0..400 {
            append(&log_path, &format!("[INFO] tick {i}\n"));
            let record = store.load(build_id).await.unwrap().unwrap();
            if record.warning.is_some() {
                handle.exit_with(0);
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no warning recorded");
    });

    let outcome = f.supervisor.run().await;
    let record = driver.await.unwrap();

    assert!(matches!(outcome, SupervisorOutcome::Exited { .. }));
    assert_eq!(record.warning.as_deref(), Some("Build running for 0 minutes"));
    assert!(record.elapsed_seconds.is_some());
}

#[tokio::test]
async fn test_cancel_after_exit_is_rejected() {
    let f = fixture(fast_settings()).await;
    f.handle.exit_with(0);
    let (request, reply) = CancelRequest::new();
    f.cancel_tx.send(request).await.unwrap();

    let outcome = f.supervisor.run().await;

    match outcome {
        SupervisorOutcome::Exited { exit } => assert_eq!(exit.code, Some(0)),
        other => panic!("Expected exit, got {}", other.kind()),
    }
    assert!(matches!(
        reply.await.unwrap(),
        Err(buildmaster::domain::errors::BuildError::ProcessNotRunning)
    ));
    assert_eq!(f.handle.terminates(), 0);
    assert_eq!(f.handle.kills(), 0);
}
