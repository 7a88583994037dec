use anyhow::Result;
use serde::Serialize;

use crate::application::OptimizationSession;
use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::TransferArgs;
use crate::domain::models::Config;
use crate::services::TransferEntry;

#[derive(Debug, Serialize)]
pub struct TransferOutput {
    pub report: String,
    pub entries: Vec<TransferEntry>,
}

impl CommandOutput for TransferOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No subtasks evaluated.".to_string();
        }
        format!(
            "{}\nAppended {} line(s) to {}",
            TableFormatter::new().format_transfer(&self.entries),
            self.entries.len(),
            self.report
        )
    }
}

pub async fn execute(args: TransferArgs, config: Config, json: bool) -> Result<()> {
    let session = OptimizationSession::from_config(config)?;
    let entries = session
        .transfer(&args.improver, &args.subtasks, &args.output)
        .await?;
    output(
        &TransferOutput {
            report: args.output.display().to_string(),
            entries,
        },
        json,
    );
    Ok(())
}
