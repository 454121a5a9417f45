//! JSON file build store.
//!
//! One pretty-printed `<build_id>.json` per build in the data directory,
//! fronted by an in-memory map. Saves write a temp file and rename it over
//! the previous version so readers never see a torn record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BuildId, BuildRecord};
use crate::domain::ports::BuildStore;

pub struct JsonBuildStore {
    data_dir: PathBuf,
    records: Arc<RwLock<HashMap<BuildId, BuildRecord>>>,
}

impl JsonBuildStore {
    /// Open a store, creating the data directory if needed.
    pub async fn open(data_dir: impl Into<PathBuf>) -> DomainResult<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await.map_err(|e| {
            DomainError::StorageError(format!(
                "Cannot create data directory {}: {e}",
                data_dir.display()
            ))
        })?;
        Ok(Self {
            data_dir,
            records: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn record_path(&self, id: BuildId) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    async fn read_record(path: &Path) -> DomainResult<BuildRecord> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Every readable record on disk. Unreadable files are skipped.
    async fn read_all(&self) -> DomainResult<Vec<BuildRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable build record");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl BuildStore for JsonBuildStore {
    async fn save(&self, record: &BuildRecord) -> DomainResult<()> {
        let path = self.record_path(record.build_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;

        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        self.records
            .write()
            .await
            .insert(record.build_id, record.clone());
        debug!(build_id = %record.build_id, status = %record.status, "Saved build record");
        Ok(())
    }

    async fn load(&self, id: BuildId) -> DomainResult<Option<BuildRecord>> {
        if let Some(record) = self.records.read().await.get(&id) {
            return Ok(Some(record.clone()));
        }

        let raw = match tokio::fs::read_to_string(self.record_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: BuildRecord = serde_json::from_str(&raw)?;
        self.records.write().await.insert(id, record.clone());
        Ok(Some(record))
    }

    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<BuildRecord>> {
        let mut by_id: HashMap<BuildId, BuildRecord> = self
            .read_all()
            .await?
            .into_iter()
            .map(|r| (r.build_id, r))
            .collect();

        for (id, record) in self.records.read().await.iter() {
            by_id.insert(*id, record.clone());
        }

        let mut records: Vec<BuildRecord> = by_id.into_values().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn find_active(&self) -> DomainResult<Option<BuildRecord>> {
        if let Some(record) = self.records.read().await.values().find(|r| r.is_active()) {
            return Ok(Some(record.clone()));
        }

        let cached = self.records.read().await;
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|r| r.is_active() && !cached.contains_key(&r.build_id)))
    }
}
