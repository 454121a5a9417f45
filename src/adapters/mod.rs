//! Adapters for external systems.

pub mod http;
pub mod notifier;
pub mod process;
pub mod storage;
