//! Build status store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BuildId, BuildRecord};

/// Durable record of every build's lifecycle.
///
/// Writes are write-through: `save` returns only after the record is durable.
/// Only the supervising task of a build saves that build's record.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Persist a record, replacing any previous version.
    async fn save(&self, record: &BuildRecord) -> DomainResult<()>;

    /// Get a record by ID.
    async fn load(&self, id: BuildId) -> DomainResult<Option<BuildRecord>>;

    /// Most recent records first, by start time.
    async fn list_recent(&self, limit: usize) -> DomainResult<Vec<BuildRecord>>;

    /// First record found in pending or running state.
    async fn find_active(&self) -> DomainResult<Option<BuildRecord>>;
}
