//! Subcommand implementations.

pub mod history;
pub mod logs;
pub mod serve;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::adapters::notifier::{LogNotifier, WebhookNotifier};
use crate::adapters::process::TokioProcessLauncher;
use crate::adapters::storage::JsonBuildStore;
use crate::domain::models::{BuildId, Config};
use crate::domain::ports::Notifier;
use crate::services::{BuildService, BuildServiceSettings, WorkerTracker};

/// Wire the production adapters into a `BuildService`.
pub async fn open_service(config: &Config) -> Result<BuildService> {
    let store = JsonBuildStore::open(&config.paths.data_dir)
        .await
        .with_context(|| format!("Failed to open build store at {}", config.paths.data_dir))?;

    let workers = WorkerTracker::new(
        Duration::from_secs(config.workers.stall_threshold_secs),
        &config.paths.worker_status_dir,
    );

    Ok(BuildService::new(
        Arc::new(store),
        Arc::new(TokioProcessLauncher::new()),
        notifier_from_config(config)?,
        workers,
        BuildServiceSettings::from_config(config),
    ))
}

/// Webhook delivery when a URL is configured, tracing events otherwise.
pub fn notifier_from_config(config: &Config) -> Result<Arc<dyn Notifier>> {
    match config.notifier.webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Ok(Arc::new(
            WebhookNotifier::new(url, &config.notifier)
                .context("Failed to create webhook notifier")?,
        )),
        _ => Ok(Arc::new(LogNotifier::new(config.notifier.recipient.clone()))),
    }
}

pub(crate) fn parse_build_id(raw: &str) -> Result<BuildId> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid build ID: {raw}"))
}
