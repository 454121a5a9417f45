use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Build ID
    pub id: String,

    /// Number of trailing lines
    #[arg(short = 'n', long, default_value = "100")]
    pub lines: usize,
}

#[derive(Debug, Serialize)]
pub struct LogsOutput {
    pub build_id: String,
    pub logs: String,
}

impl CommandOutput for LogsOutput {
    fn to_human(&self) -> String {
        self.logs.trim_end().to_string()
    }
}

pub async fn execute(args: LogsArgs, config: &Config, json: bool) -> Result<()> {
    let build_id = super::parse_build_id(&args.id)?;
    let service = super::open_service(config).await?;
    let logs = service.logs(build_id, args.lines).await?;
    output(
        &LogsOutput {
            build_id: build_id.to_string(),
            logs,
        },
        json,
    );
    Ok(())
}
