//! Domain errors for the BuildMaster build monitor.

use thiserror::Error;

use super::models::build::{BuildId, BuildStatus};

/// Domain-level errors raised by models, stores and adapters.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Process error: {0}")]
    ProcessError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Errors returned by build orchestration operations.
///
/// `NotCancellable` and `AlreadyActive` are user errors; the REST layer maps
/// them to 400 rather than 500.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build not found: {0}")]
    NotFound(BuildId),

    #[error("Build cannot be killed - current status: {status}")]
    NotCancellable { status: BuildStatus },

    #[error("Build process is not running")]
    ProcessNotRunning,

    #[error("Build already running: {0}")]
    AlreadyActive(BuildId),

    #[error("Invalid build request: {0}")]
    InvalidRequest(String),

    #[error("Failed to start build {build_id}: {reason}")]
    SpawnFailed { build_id: BuildId, reason: String },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl BuildError {
    /// Whether the failure was caused by the caller rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::NotCancellable { .. }
                | Self::ProcessNotRunning
                | Self::AlreadyActive(_)
                | Self::InvalidRequest(_)
        )
    }
}

/// Notification delivery errors. Never propagated into build state.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Notification rejected with status {0}")]
    Rejected(u16),
}
