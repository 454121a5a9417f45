//! Build worker tracking.
//!
//! Workers are parallel jobs inside one build. They are tracked in memory and
//! also reported by the build script through `*-workers.json` files in the
//! worker status directory. Stall state is derived on read from
//! `last_updated` and is never stored.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const WORKER_FILE_SUFFIX: &str = "-workers.json";

/// Reported state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Completed,
    Failed,
    Stalled,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stalled => "stalled",
        }
    }

    /// Unknown values count as running, matching what the build script means
    /// by an in-progress job.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "stalled" => Self::Stalled,
            _ => Self::Running,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct WorkerRecord {
    job_name: String,
    status: WorkerStatus,
    started_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

/// One worker as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: String,
    pub job_name: String,
    pub status: WorkerStatus,
    pub duration_seconds: i64,
    pub last_updated: String,
    pub is_stalled: bool,
}

/// Worker list with counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub workers: Vec<WorkerView>,
    pub total_workers: usize,
    pub running_workers: usize,
    pub stalled_workers: usize,
}

impl WorkerSummary {
    fn from_views(workers: Vec<WorkerView>) -> Self {
        let running_workers = workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Running)
            .count();
        let stalled_workers = workers.iter().filter(|w| w.is_stalled).count();
        Self {
            total_workers: workers.len(),
            running_workers,
            stalled_workers,
            workers,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkerStatusFile {
    #[serde(default)]
    workers: HashMap<String, FileWorker>,
}

#[derive(Debug, Deserialize)]
struct FileWorker {
    job_name: Option<String>,
    status: Option<String>,
    duration: Option<f64>,
    completed_at: Option<String>,
    failed_at: Option<String>,
}

/// In-memory worker registry plus the script's status files.
#[derive(Clone)]
pub struct WorkerTracker {
    workers: Arc<RwLock<HashMap<String, WorkerRecord>>>,
    stall_threshold: Duration,
    status_dir: PathBuf,
}

impl WorkerTracker {
    pub fn new(stall_threshold: std::time::Duration, status_dir: impl Into<PathBuf>) -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
            stall_threshold: Duration::from_std(stall_threshold).unwrap_or(Duration::minutes(5)),
            status_dir: status_dir.into(),
        }
    }

    pub fn status_dir(&self) -> &Path {
        &self.status_dir
    }

    /// Record a heartbeat. The first update of a worker fixes its start time.
    pub async fn update_worker(&self, worker_id: &str, job_name: &str, status: WorkerStatus) {
        self.update_worker_at(worker_id, job_name, status, Utc::now())
            .await;
    }

    pub(crate) async fn update_worker_at(
        &self,
        worker_id: &str,
        job_name: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) {
        let mut workers = self.workers.write().await;
        let started_at = workers.get(worker_id).map_or(now, |w| w.started_at);
        workers.insert(
            worker_id.to_string(),
            WorkerRecord {
                job_name: job_name.to_string(),
                status,
                started_at,
                last_updated: now,
            },
        );
    }

    pub async fn remove_worker(&self, worker_id: &str) {
        self.workers.write().await.remove(worker_id);
    }

    /// Forget every worker and delete the script's status files.
    pub async fn clear(&self) {
        self.workers.write().await.clear();

        for path in self.worker_files().await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Could not delete worker status file");
            }
        }
    }

    /// IDs of running workers whose last update is older than the threshold.
    pub async fn stalled_workers(&self) -> Vec<String> {
        self.stalled_workers_at(Utc::now()).await
    }

    pub(crate) async fn stalled_workers_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut stalled: Vec<String> = workers
            .iter()
            .filter(|(_, w)| w.status == WorkerStatus::Running && self.is_stale(w, now))
            .map(|(id, _)| id.clone())
            .collect();
        stalled.sort();
        stalled
    }

    /// Mark every stalled worker as such and return their IDs.
    pub async fn handle_stalled(&self) -> Vec<String> {
        self.handle_stalled_at(Utc::now()).await
    }

    pub(crate) async fn handle_stalled_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let stalled = self.stalled_workers_at(now).await;
        let mut workers = self.workers.write().await;
        for id in &stalled {
            if let Some(worker) = workers.get_mut(id) {
                warn!(worker_id = %id, job = %worker.job_name, "Worker stalled, marking for recovery");
                worker.status = WorkerStatus::Stalled;
                worker.last_updated = now;
            }
        }
        if !stalled.is_empty() {
            info!(count = stalled.len(), "Handled stalled workers");
        }
        stalled
    }

    /// Tracked workers only.
    pub async fn tracked(&self) -> Vec<WorkerView> {
        self.tracked_at(Utc::now()).await
    }

    pub(crate) async fn tracked_at(&self, now: DateTime<Utc>) -> Vec<WorkerView> {
        let workers = self.workers.read().await;
        let mut views: Vec<WorkerView> = workers
            .iter()
            .map(|(id, w)| {
                let is_stalled = self.is_stale(w, now);
                WorkerView {
                    id: id.clone(),
                    job_name: w.job_name.clone(),
                    status: if is_stalled { WorkerStatus::Stalled } else { w.status },
                    duration_seconds: (now - w.started_at).num_seconds(),
                    last_updated: w.last_updated.to_rfc3339(),
                    is_stalled,
                }
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Tracked workers merged with the script's status files. Tracked entries
    /// win on ID collisions; unreadable files are skipped.
    pub async fn summary(&self) -> WorkerSummary {
        self.summary_at(Utc::now()).await
    }

    pub(crate) async fn summary_at(&self, now: DateTime<Utc>) -> WorkerSummary {
        let mut views = self.tracked_at(now).await;

        for path in self.worker_files().await {
            match read_worker_file(&path).await {
                Ok(file) => {
                    let mut reported: Vec<_> = file.workers.into_iter().collect();
                    reported.sort_by(|a, b| a.0.cmp(&b.0));
                    for (id, info) in reported {
                        if views.iter().any(|v| v.id == id) {
                            continue;
                        }
                        views.push(file_worker_view(id, info, now));
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read worker status file");
                }
            }
        }

        WorkerSummary::from_views(views)
    }

    fn is_stale(&self, worker: &WorkerRecord, now: DateTime<Utc>) -> bool {
        now - worker.last_updated > self.stall_threshold
    }

    async fn worker_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.status_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.status_dir.display(), error = %e, "Worker status directory unavailable");
                return files;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_worker_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(WORKER_FILE_SUFFIX));
            if is_worker_file {
                files.push(path);
            }
        }
        files.sort();
        files
    }
}

async fn read_worker_file(path: &Path) -> anyhow::Result<WorkerStatusFile> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

fn file_worker_view(id: String, info: FileWorker, now: DateTime<Utc>) -> WorkerView {
    let status = info
        .status
        .as_deref()
        .map_or(WorkerStatus::Running, WorkerStatus::parse_lenient);
    #[allow(clippy::cast_possible_truncation)]
    let duration_seconds = info.duration.unwrap_or(0.0) as i64;
    WorkerView {
        id,
        job_name: info.job_name.unwrap_or_else(|| "Unknown Job".to_string()),
        status,
        duration_seconds,
        last_updated: info
            .completed_at
            .or(info.failed_at)
            .unwrap_or_else(|| now.to_rfc3339()),
        is_stalled: status == WorkerStatus::Stalled,
    }
}
