use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::cli::table::detail_table;
use crate::domain::models::{BuildRecord, Config};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Build ID
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct StatusOutput {
    pub record: BuildRecord,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let r = &self.record;
        let opt = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

        let mut rows = vec![
            ("Build", r.build_id.to_string()),
            ("Status", r.status.to_string()),
            ("Mode", r.config.build_mode.to_string()),
            ("Progress", format!("{:.1}%", r.progress)),
            ("Step", r.current_step.clone()),
            ("Started", r.started_at.to_rfc3339()),
            ("Completed", opt(r.completed_at.map(|t| t.to_rfc3339()))),
            ("Duration", opt(r.duration_seconds.map(|d| format!("{d:.1}s")))),
            ("Workers", opt(r.worker_count.map(|w| w.to_string()))),
            ("Message", opt(r.message.clone())),
        ];
        if let Some(error_type) = r.error_type {
            rows.push(("Error type", error_type.to_string()));
        }
        if let Some(warning) = &r.warning {
            rows.push(("Warning", warning.clone()));
        }
        if let Some(size) = r.build_size_mb {
            rows.push(("Build size", format!("{size:.1} MB")));
        }

        let mut human = detail_table(&rows).to_string();
        if let Some(error) = &r.error {
            human.push_str("\n\n");
            human.push_str(error);
        }
        human
    }
}

pub async fn execute(args: StatusArgs, config: &Config, json: bool) -> Result<()> {
    let build_id = super::parse_build_id(&args.id)?;
    let service = super::open_service(config).await?;
    let record = service.status(build_id).await?;
    output(&StatusOutput { record }, json);
    Ok(())
}
