//! Notifier that only writes tracing events. Used when no webhook is set.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{completed_subject, started_subject, stalled_subject, STALL_OUTPUT_CHARS};
use crate::domain::errors::NotifyError;
use crate::domain::models::{BuildId, BuildRequest};
use crate::domain::ports::Notifier;
use crate::services::log_parser::tail_chars;

#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    recipient: String,
}

impl LogNotifier {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn build_started(
        &self,
        build_id: BuildId,
        config: &BuildRequest,
    ) -> Result<(), NotifyError> {
        info!(
            recipient = %self.recipient,
            subject = %started_subject(build_id),
            mode = %config.build_mode,
            workers = ?config.workers,
            "Build notification"
        );
        Ok(())
    }

    async fn build_completed(
        &self,
        build_id: BuildId,
        success: bool,
        message: &str,
        error: Option<&str>,
    ) -> Result<(), NotifyError> {
        let subject = completed_subject(build_id, success);
        if success {
            info!(recipient = %self.recipient, subject = %subject, detail = message, "Build notification");
        } else {
            warn!(recipient = %self.recipient, subject = %subject, detail = message, error, "Build notification");
        }
        Ok(())
    }

    async fn build_stalled(&self, build_id: BuildId, last_output: &str) -> Result<(), NotifyError> {
        warn!(
            recipient = %self.recipient,
            subject = %stalled_subject(build_id),
            last_output = tail_chars(last_output, STALL_OUTPUT_CHARS),
            "Build notification"
        );
        Ok(())
    }
}
