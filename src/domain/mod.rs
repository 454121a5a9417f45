//! Domain layer for the BuildMaster build monitor
//!
//! This module contains the build models, error types and port traits.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{BuildError, DomainError, DomainResult, NotifyError};
