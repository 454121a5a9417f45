//! Webhook notifier: POSTs build events as JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{completed_subject, started_subject, stalled_subject, STALL_OUTPUT_CHARS};
use crate::domain::errors::NotifyError;
use crate::domain::models::{BuildId, BuildRequest, NotifierConfig};
use crate::domain::ports::Notifier;
use crate::services::log_parser::tail_chars;

/// Body of a webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub event: String,
    pub build_id: BuildId,
    pub subject: String,
    pub recipient: String,
    pub dashboard_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    recipient: String,
    dashboard_url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, config: &NotifierConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            recipient: config.recipient.clone(),
            dashboard_url: config.dashboard_url.clone(),
        })
    }

    fn event(&self, event: &str, build_id: BuildId, subject: String) -> BuildEvent {
        BuildEvent {
            event: event.to_string(),
            build_id,
            subject,
            recipient: self.recipient.clone(),
            dashboard_url: self.dashboard_url.clone(),
            success: None,
            message: None,
            error: None,
            build_mode: None,
            workers: None,
            last_output: None,
        }
    }

    async fn post(&self, body: &BuildEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        debug!(event = %body.event, build_id = %body.build_id, "Webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn build_started(
        &self,
        build_id: BuildId,
        config: &BuildRequest,
    ) -> Result<(), NotifyError> {
        let mut body = self.event("build_started", build_id, started_subject(build_id));
        body.build_mode = Some(config.build_mode.to_string());
        body.workers = config.workers;
        self.post(&body).await
    }

    async fn build_completed(
        &self,
        build_id: BuildId,
        success: bool,
        message: &str,
        error: Option<&str>,
    ) -> Result<(), NotifyError> {
        let mut body = self.event(
            "build_completed",
            build_id,
            completed_subject(build_id, success),
        );
        body.success = Some(success);
        body.message = Some(message.to_string());
        body.error = error.map(str::to_string);
        self.post(&body).await
    }

    async fn build_stalled(&self, build_id: BuildId, last_output: &str) -> Result<(), NotifyError> {
        let mut body = self.event("build_stalled", build_id, stalled_subject(build_id));
        body.last_output = Some(tail_chars(last_output, STALL_OUTPUT_CHARS).to_string());
        self.post(&body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn notifier(url: String) -> WebhookNotifier {
        WebhookNotifier::new(url, &NotifierConfig::default()).unwrap()
    }

    #[test]
    fn test_new_applies_configured_timeout() {
        let config = NotifierConfig {
            timeout_secs: 3,
            ..NotifierConfig::default()
        };
        let notifier = WebhookNotifier::new("http://localhost/hook", &config);
        assert!(notifier.is_ok());
    }

    #[tokio::test]
    async fn test_completed_event_posted() {
        let mut server = Server::new_async().await;
        let id = BuildId::new();
        let mock = server
            .mock("POST", "/hooks/build")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "event": "build_completed",
                "build_id": id.to_string(),
                "subject": format!("Build Failed - {}", id.short()),
                "success": false,
                "message": "Build failed: boom",
                "error": "boom",
            })))
            .with_status(204)
            .create_async()
            .await;

        let result = notifier(format!("{}/hooks/build", server.url()))
            .build_completed(id, false, "Build failed: boom", Some("boom"))
            .await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stalled_event_truncates_output() {
        let mut server = Server::new_async().await;
        let id = BuildId::new();
        let output = format!("{}LAST", "x".repeat(2000));
        let expected_tail = tail_chars(&output, STALL_OUTPUT_CHARS).to_string();
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "event": "build_stalled",
                "last_output": expected_tail,
            })))
            .with_status(200)
            .create_async()
            .await;

        notifier(server.url()).build_stalled(id, &output).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_status_is_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(500)
            .create_async()
            .await;

        let err = notifier(server.url())
            .build_started(BuildId::new(), &BuildRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(500)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let err = notifier("http://127.0.0.1:1/unreachable".to_string())
            .build_started(BuildId::new(), &BuildRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }
}
