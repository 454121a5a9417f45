//! Build process adapters.

pub mod tokio_process;

pub use tokio_process::{ChildProcess, TokioProcessLauncher};
