//! Command-line interface.
//!
//! `serve` runs the dashboard API; the remaining subcommands read the build
//! store and log directory directly and work without a running server.

pub mod commands;
pub mod output;
pub mod table;

use clap::{Parser, Subcommand};

use crate::domain::errors::BuildError;

#[derive(Parser, Debug)]
#[command(name = "buildmaster")]
#[command(about = "BuildMaster - build orchestration and monitoring", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .buildmaster/
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the build dashboard HTTP API
    Serve(commands::serve::ServeArgs),

    /// List recent builds
    History(commands::history::HistoryArgs),

    /// Show one build record
    Status(commands::status::StatusArgs),

    /// Print the tail of a build log
    Logs(commands::logs::LogsArgs),
}

/// Print an error and exit non-zero. User errors exit with 2.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let user_error = err
        .downcast_ref::<BuildError>()
        .is_some_and(BuildError::is_user_error);

    if json_mode {
        let body = serde_json::json!({
            "error": format!("{err:#}"),
            "code": if user_error { "USER_ERROR" } else { "ERROR" },
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }

    std::process::exit(if user_error { 2 } else { 1 });
}
