//! Operator notification adapters.

pub mod log;
pub mod webhook;

pub use log::LogNotifier;
pub use webhook::{BuildEvent, WebhookNotifier};

use crate::domain::models::BuildId;

/// Characters of build output included in a stall notification.
pub const STALL_OUTPUT_CHARS: usize = 500;

pub fn started_subject(build_id: BuildId) -> String {
    format!("Build Started - {}", build_id.short())
}

pub fn completed_subject(build_id: BuildId, success: bool) -> String {
    let status = if success { "Success" } else { "Failed" };
    format!("Build {status} - {}", build_id.short())
}

pub fn stalled_subject(build_id: BuildId) -> String {
    format!("Build Stalled - {}", build_id.short())
}
