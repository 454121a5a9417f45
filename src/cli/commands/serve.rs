use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use crate::adapters::http::{BuildHttpConfig, BuildHttpServer};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind address (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port (overrides server.port)
    #[arg(short, long)]
    pub port: Option<u16>,
}

pub async fn execute(args: ServeArgs, config: &Config) -> Result<()> {
    let service = super::open_service(config).await?;

    let recovered = service
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted builds")?;
    if recovered > 0 {
        warn!(count = recovered, "Failed builds left running by a previous process");
    }

    let mut http_config = BuildHttpConfig::from(&config.server);
    if let Some(host) = args.host {
        http_config.host = host;
    }
    if let Some(port) = args.port {
        http_config.port = port;
    }

    info!(
        working_dir = %config.paths.working_dir,
        data_dir = %config.paths.data_dir,
        "Starting BuildMaster"
    );

    BuildHttpServer::new(service, http_config)
        .serve_with_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await
}
