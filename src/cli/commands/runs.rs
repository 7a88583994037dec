use anyhow::Result;
use serde::Serialize;

use crate::application::OptimizationSession;
use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::checkpoint::RunInfo;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunsOutput {
    pub runs: Vec<RunInfo>,
}

impl CommandOutput for RunsOutput {
    fn to_human(&self) -> String {
        if self.runs.is_empty() {
            return "No runs found.".to_string();
        }
        format!(
            "{}\n{} run(s)",
            TableFormatter::new().format_runs(&self.runs),
            self.runs.len()
        )
    }
}

pub async fn execute(config: Config, json: bool) -> Result<()> {
    let session = OptimizationSession::from_config(config)?;
    let runs = session.runs().await?;
    output(&RunsOutput { runs }, json);
    Ok(())
}
