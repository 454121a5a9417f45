pub mod build_env;
pub mod build_service;
pub mod build_supervisor;
pub mod exit_classifier;
pub mod log_parser;
pub mod progress;
pub mod worker_tracker;

pub use build_service::{BuildResult, BuildService, BuildServiceSettings};
pub use build_supervisor::{BuildSupervisor, CancelRequest, SupervisorOutcome, SupervisorSettings};
pub use exit_classifier::{classify_exit, ExitClassification};
pub use log_parser::{parse_log_line, LogEntry, LogLevel};
pub use worker_tracker::{WorkerStatus, WorkerSummary, WorkerTracker, WorkerView};
