//! Build domain model.
//!
//! A build is one run of the external build script. Its record is created
//! when the build is requested and mutated in place until it reaches a
//! terminal state; it is then kept as history.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Opaque build identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(Uuid);

impl BuildId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight characters, used in notification subjects.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BuildId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| DomainError::ValidationFailed(format!("Invalid build id: {s}")))
    }
}

impl From<Uuid> for BuildId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Build requested, process not yet supervised
    Pending,
    /// Process is running under supervision
    Running,
    /// Exit code 0 and a success marker in the log
    Success,
    /// Any failure, including forced timeout and out-of-memory kills
    Error,
    /// Killed after producing no output for the stall window
    Stalled,
    /// Killed on operator request
    Cancelled,
}

impl Default for BuildStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Stalled => "stalled",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "stalled" => Some(Self::Stalled),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Pending or running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Stalled is reported separately in the UI but belongs to the error family.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Stalled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<BuildStatus> {
        match self {
            Self::Pending => vec![Self::Running, Self::Error, Self::Cancelled],
            Self::Running => vec![
                Self::Running,
                Self::Success,
                Self::Error,
                Self::Stalled,
                Self::Cancelled,
            ],
            Self::Success | Self::Error | Self::Stalled | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed taxonomy of build failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    Timeout,
    Stalled,
    OutOfMemory,
    ConnectionError,
    ModuleNotFound,
    SyntaxError,
    TypeError,
    BuildError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Stalled => "STALLED",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::ModuleNotFound => "MODULE_NOT_FOUND",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::TypeError => "TYPE_ERROR",
            Self::BuildError => "BUILD_ERROR",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named build preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    Quick,
    Full,
    Phased,
    PhasedProd,
    Clean,
    RamOptimized,
}

impl Default for BuildMode {
    fn default() -> Self {
        Self::Full
    }
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
            Self::Phased => "phased",
            Self::PhasedProd => "phased-prod",
            Self::Clean => "clean",
            Self::RamOptimized => "ram-optimized",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MAX_WORKERS: u32 = 16;
const MAX_OLD_SPACE_MB: u32 = 32_768;
const MAX_SEMI_SPACE_MB: u32 = 4_096;

/// Requested build configuration. Stored verbatim on the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(default)]
    pub workers: Option<u32>,

    #[serde(default)]
    pub max_old_space_size: Option<u32>,

    #[serde(default)]
    pub max_semi_space_size: Option<u32>,

    #[serde(default)]
    pub build_mode: BuildMode,

    #[serde(default = "default_build_type")]
    pub build_type: Option<String>,

    #[serde(default = "default_true")]
    pub test_database: bool,

    #[serde(default = "default_true")]
    pub test_redis: bool,

    #[serde(default)]
    pub skip_deps: bool,

    #[serde(default)]
    pub force_clean: bool,

    #[serde(default)]
    pub experimental_flags: Option<Vec<String>>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_build_type() -> Option<String> {
    Some("development".to_string())
}

const fn default_true() -> bool {
    true
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self {
            workers: None,
            max_old_space_size: None,
            max_semi_space_size: None,
            build_mode: BuildMode::default(),
            build_type: default_build_type(),
            test_database: true,
            test_redis: true,
            skip_deps: false,
            force_clean: false,
            experimental_flags: None,
        }
    }
}

impl BuildRequest {
    pub fn with_mode(build_mode: BuildMode) -> Self {
        Self {
            build_mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if let Some(workers) = self.workers {
            if workers > MAX_WORKERS {
                return Err(DomainError::ValidationFailed(format!(
                    "workers must be between 0 and {MAX_WORKERS}, got {workers}"
                )));
            }
        }
        if let Some(size) = self.max_old_space_size {
            if size > MAX_OLD_SPACE_MB {
                return Err(DomainError::ValidationFailed(format!(
                    "max_old_space_size must be between 0 and {MAX_OLD_SPACE_MB}, got {size}"
                )));
            }
        }
        if let Some(size) = self.max_semi_space_size {
            if size > MAX_SEMI_SPACE_MB {
                return Err(DomainError::ValidationFailed(format!(
                    "max_semi_space_size must be between 0 and {MAX_SEMI_SPACE_MB}, got {size}"
                )));
            }
        }
        Ok(())
    }
}

/// Durable status record of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub build_id: BuildId,
    pub status: BuildStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub step_index: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<ErrorType>,
    pub config: BuildRequest,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub worker_count: Option<u32>,
    #[serde(default)]
    pub elapsed_seconds: Option<u64>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub build_size_mb: Option<f64>,
    #[serde(default)]
    pub timings: Option<BTreeMap<String, f64>>,
}

impl BuildRecord {
    /// Create a fresh pending record.
    pub fn pending(build_id: BuildId, config: BuildRequest) -> Self {
        Self {
            build_id,
            status: BuildStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            progress: 0.0,
            current_step: "INIT".to_string(),
            step_index: None,
            message: Some("Build queued".to_string()),
            error: None,
            error_type: None,
            config,
            log_file: None,
            worker_count: None,
            elapsed_seconds: None,
            warning: None,
            duration_seconds: None,
            build_size_mb: None,
            timings: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Move to a new status, rejecting transitions the state machine forbids.
    pub fn transition_to(&mut self, new_status: BuildStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }
        self.status = new_status;
        Ok(())
    }

    /// Raise progress; never lowers it.
    pub fn advance_progress(&mut self, progress: f64) {
        if progress > self.progress {
            self.progress = progress.min(100.0);
        }
    }

    /// Stamp completion time and duration.
    pub fn mark_completed(&mut self, completed_at: DateTime<Utc>) {
        let duration = (completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.completed_at = Some(completed_at);
        self.duration_seconds = Some((duration * 100.0).round() / 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_and_active() {
        assert!(BuildStatus::Pending.is_active());
        assert!(BuildStatus::Running.is_active());
        for status in [
            BuildStatus::Success,
            BuildStatus::Error,
            BuildStatus::Stalled,
            BuildStatus::Cancelled,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
            assert!(status.valid_transitions().is_empty());
        }
        assert!(BuildStatus::Stalled.is_failure());
        assert!(!BuildStatus::Cancelled.is_failure());
    }

    #[test]
    fn test_status_transitions() {
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Running));
        assert!(!BuildStatus::Pending.can_transition_to(BuildStatus::Success));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Stalled));
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Running));
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(serde_json::to_string(&BuildStatus::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(BuildStatus::from_str("canceled"), Some(BuildStatus::Cancelled));
        assert_eq!(BuildStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_error_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&ErrorType::OutOfMemory).unwrap(),
            "\"OUT_OF_MEMORY\""
        );
        let parsed: ErrorType = serde_json::from_str("\"MODULE_NOT_FOUND\"").unwrap();
        assert_eq!(parsed, ErrorType::ModuleNotFound);
    }

    #[test]
    fn test_build_mode_kebab_case() {
        let mode: BuildMode = serde_json::from_str("\"phased-prod\"").unwrap();
        assert_eq!(mode, BuildMode::PhasedProd);
        assert_eq!(BuildMode::RamOptimized.to_string(), "ram-optimized");
    }

    #[test]
    fn test_request_defaults_from_empty_json() {
        let request: BuildRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, BuildRequest::default());
        assert_eq!(request.build_mode, BuildMode::Full);
        assert!(request.test_database);
        assert_eq!(request.build_type.as_deref(), Some("development"));
    }

    #[test]
    fn test_request_validation_bounds() {
        let mut request = BuildRequest {
            workers: Some(16),
            max_old_space_size: Some(32_768),
            ..BuildRequest::default()
        };
        assert!(request.validate().is_ok());

        request.workers = Some(17);
        assert!(matches!(
            request.validate(),
            Err(DomainError::ValidationFailed(_))
        ));

        request.workers = None;
        request.max_semi_space_size = Some(5000);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_record_transition_rejects_backward_moves() {
        let mut record = BuildRecord::pending(BuildId::new(), BuildRequest::default());
        record.transition_to(BuildStatus::Running).unwrap();
        record.transition_to(BuildStatus::Success).unwrap();
        let err = record.transition_to(BuildStatus::Running).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(record.status, BuildStatus::Success);
    }

    #[test]
    fn test_advance_progress_is_monotonic() {
        let mut record = BuildRecord::pending(BuildId::new(), BuildRequest::default());
        record.advance_progress(40.0);
        record.advance_progress(12.0);
        assert!((record.progress - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_build_id_parse_and_short() {
        let id = BuildId::new();
        let parsed: BuildId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 8);
        assert!("../etc/passwd".parse::<BuildId>().is_err());
    }

    #[test]
    fn test_mark_completed_sets_duration() {
        let mut record = BuildRecord::pending(BuildId::new(), BuildRequest::default());
        let completed = record.started_at + chrono::Duration::milliseconds(2_500);
        record.mark_completed(completed);
        assert_eq!(record.completed_at, Some(completed));
        assert_eq!(record.duration_seconds, Some(2.5));
    }
}
