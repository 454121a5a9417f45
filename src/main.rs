//! BuildMaster CLI entry point.

use anyhow::Result;
use clap::Parser;

use buildmaster::cli::{commands, handle_error, Cli, Commands};
use buildmaster::domain::models::Config;
use buildmaster::infrastructure::config::ConfigLoader;
use buildmaster::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli.command, cli.config.as_deref(), cli.json).await {
        handle_error(err, cli.json);
    }
}

async fn run(command: Commands, config_path: Option<&str>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    match command {
        Commands::Serve(args) => commands::serve::execute(args, &config).await,
        Commands::History(args) => commands::history::execute(args, &config, json).await,
        Commands::Status(args) => commands::status::execute(args, &config, json).await,
        Commands::Logs(args) => commands::logs::execute(args, &config, json).await,
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}
