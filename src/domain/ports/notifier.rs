//! Build notification port.

use async_trait::async_trait;

use crate::domain::errors::NotifyError;
use crate::domain::models::{BuildId, BuildRequest};

/// Informs the operator about build lifecycle events.
///
/// Delivery is best-effort. Callers dispatch these off the build's critical
/// path and only log failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn build_started(&self, build_id: BuildId, config: &BuildRequest)
        -> Result<(), NotifyError>;

    async fn build_completed(
        &self,
        build_id: BuildId,
        success: bool,
        message: &str,
        error: Option<&str>,
    ) -> Result<(), NotifyError>;

    async fn build_stalled(&self, build_id: BuildId, last_output: &str) -> Result<(), NotifyError>;
}
