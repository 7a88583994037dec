use anyhow::Result;
use serde::Serialize;

use crate::application::OptimizationSession;
use crate::cli::output::{format_score, output, CommandOutput};
use crate::cli::types::EvaluateArgs;
use crate::domain::models::{Config, EvalMode};

#[derive(Debug, Serialize)]
pub struct EvaluateOutput {
    pub file: String,
    pub task: String,
    pub mode: EvalMode,
    pub score: f64,
}

impl CommandOutput for EvaluateOutput {
    fn to_human(&self) -> String {
        format!(
            "{} on {} ({}): {}",
            self.file,
            self.task,
            self.mode,
            format_score(Some(self.score))
        )
    }
}

pub async fn execute(args: EvaluateArgs, config: Config, json: bool) -> Result<()> {
    let task = args.task.unwrap_or_else(|| config.task.clone());
    let session = OptimizationSession::from_config(config)?;
    let score = session.evaluate(&args.file, &task, args.mode).await?;

    output(
        &EvaluateOutput {
            file: args.file.display().to_string(),
            task,
            mode: args.mode,
            score: score.value,
        },
        json,
    );
    Ok(())
}
