//! BuildMaster - build orchestration and monitoring
//!
//! BuildMaster launches a long-running external build script, watches its log
//! output to report step progress, detects stalls, timeouts and
//! out-of-memory crashes, classifies failures and keeps a durable status
//! record for every build.
//!
//! # Architecture
//!
//! The crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Build models, errors and port traits
//! - **Service Layer** (`services`): Log parsing, supervision and orchestration
//! - **Adapters** (`adapters`): JSON store, process launcher, notifiers, HTTP API
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use buildmaster::cli::commands::open_service;
//! use buildmaster::domain::models::BuildRequest;
//!
//! let service = open_service(&config).await?;
//! let record = service.start(BuildRequest::default()).await?;
//! println!("started {}", record.build_id);
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{BuildError, DomainError, DomainResult, NotifyError};
pub use domain::models::{
    BuildId, BuildMode, BuildRecord, BuildRequest, BuildStatus, Config, ErrorType, LoggingConfig,
};
pub use domain::ports::{BuildStore, ManagedProcess, Notifier, ProcessLauncher};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{BuildService, BuildServiceSettings, WorkerTracker};
