//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces implemented by the adapters:
//! - BuildStore: durable build status records
//! - Notifier: operator notifications
//! - ProcessLauncher / ManagedProcess: the external build process

pub mod build_process;
pub mod build_store;
pub mod notifier;

pub use build_process::{LaunchSpec, ManagedProcess, ProcessExit, ProcessLauncher};
pub use build_store::BuildStore;
pub use notifier::Notifier;
