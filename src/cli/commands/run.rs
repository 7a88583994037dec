use std::sync::Arc;

use anyhow::Result;
use console::style;
use serde::Serialize;

use crate::application::{OptimizationSession, RunStart};
use crate::cli::output::progress::ProgressObserver;
use crate::cli::output::table::TableFormatter;
use crate::cli::output::{format_score, output, CommandOutput};
use crate::cli::types::RunArgs;
use crate::domain::models::{Config, RunSummary};
use crate::services::IterationObserver;

#[derive(Debug, Serialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub accepted: usize,
    pub best_score: Option<f64>,
}

impl From<RunSummary> for RunOutput {
    fn from(summary: RunSummary) -> Self {
        Self {
            accepted: summary.iterations.iter().filter(|r| r.accepted()).count(),
            best_score: summary.best_score(),
            summary,
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Run {}", style(self.summary.run_id.as_str()).bold()),
            format!(
                "  Iterations: {} from {} ({} accepted)",
                self.summary.iterations.len(),
                self.summary.start_iteration,
                self.accepted
            ),
            format!("  Baseline: {}", format_score(self.summary.baseline_score)),
            format!("  Best: {}", format_score(self.best_score)),
        ];
        if !self.summary.iterations.is_empty() {
            lines.push(TableFormatter::new().format_iterations(&self.summary.iterations));
        }
        lines.join("\n")
    }
}

fn run_start(args: &RunArgs) -> RunStart {
    match (&args.resume_from, args.resume_last) {
        (Some(run), _) => RunStart::Resume(run.clone()),
        (None, true) => RunStart::ResumeLast,
        (None, false) => RunStart::Fresh,
    }
}

pub async fn execute(args: RunArgs, mut config: Config, json: bool) -> Result<()> {
    if let Some(n) = args.iterations {
        config.n_iterations = n;
    }
    let start = run_start(&args);
    let session = OptimizationSession::from_config(config)?;

    let progress = ProgressObserver::new(!json);
    let observer: Arc<dyn IterationObserver> = Arc::new(progress.clone());
    let summary = session.run(start, Some(observer)).await?;
    let result = RunOutput::from(summary);
    progress.finish(result.accepted, result.summary.iterations.len());

    output(&result, json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RunId;

    #[test]
    fn test_run_start_selection() {
        let args = RunArgs {
            resume_from: Some(RunId::from("12_x")),
            resume_last: false,
            iterations: None,
        };
        assert_eq!(run_start(&args), RunStart::Resume(RunId::from("12_x")));

        let args = RunArgs {
            resume_from: None,
            resume_last: true,
            iterations: None,
        };
        assert_eq!(run_start(&args), RunStart::ResumeLast);
    }
}
