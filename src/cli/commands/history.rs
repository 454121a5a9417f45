use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::{BuildRecord, Config};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum number of builds to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryOutput {
    pub history: Vec<BuildRecord>,
}

impl CommandOutput for HistoryOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "status", "mode", "started", "duration", "message"]);
        for record in &self.history {
            let duration = record
                .duration_seconds
                .map(|d| format!("{d:.0}s"))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                record.build_id.short(),
                record.status.to_string(),
                record.config.build_mode.to_string(),
                record.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                duration,
                truncate(record.message.as_deref().unwrap_or(""), 60),
            ]);
        }
        render_list("build", &table, self.history.len())
    }
}

pub async fn execute(args: HistoryArgs, config: &Config, json: bool) -> Result<()> {
    let service = super::open_service(config).await?;
    let history = service.history(args.limit).await?;
    output(&HistoryOutput { history }, json);
    Ok(())
}
