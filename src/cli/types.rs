//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::models::{EvalMode, RunId};

#[derive(Parser, Debug)]
#[command(name = "metaopt")]
#[command(about = "metaopt - sandboxed, budgeted self-improving code optimizer", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file layered over the project configuration
    #[arg(short, long, global = true, env = "METAOPT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the improvement loop
    Run(RunArgs),

    /// Score one candidate file
    Evaluate(EvaluateArgs),

    /// Score an improver on several downstream tasks
    Transfer(TransferArgs),

    /// List runs under the results directory
    Runs,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Resume the given run
    #[arg(long, conflicts_with = "resume_last")]
    pub resume_from: Option<RunId>,

    /// Resume the most recent run
    #[arg(long)]
    pub resume_last: bool,

    /// Override the number of iterations
    #[arg(short = 'n', long)]
    pub iterations: Option<u32>,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Candidate source file
    pub file: PathBuf,

    /// Task whose utility scores the candidate (defaults to the configured task)
    #[arg(short, long)]
    pub task: Option<String>,

    /// Instance set to score against
    #[arg(short, long, default_value = "val")]
    pub mode: EvalMode,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    /// Improver source file
    #[arg(short, long)]
    pub improver: PathBuf,

    /// Downstream tasks to evaluate on
    #[arg(short, long = "subtask", required = true, num_args = 1..)]
    pub subtasks: Vec<String>,

    /// JSON-lines report to append to
    #[arg(short, long, default_value = "transfer_eval.jsonl")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_resume() {
        let cli = Cli::parse_from(["metaopt", "--json", "run", "--resume-from", "17_x", "-n", "3"]);
        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.resume_from.as_ref().map(RunId::as_str), Some("17_x"));
                assert_eq!(args.iterations, Some(3));
                assert!(!args.resume_last);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_resume_from_rejects_path_components() {
        assert!(Cli::try_parse_from(["metaopt", "run", "--resume-from", "../outside"]).is_err());
        assert!(Cli::try_parse_from(["metaopt", "run", "--resume-from", "a/b"]).is_err());
    }

    #[test]
    fn test_resume_flags_conflict() {
        assert!(Cli::try_parse_from(["metaopt", "run", "--resume-from", "1_x", "--resume-last"]).is_err());
    }

    #[test]
    fn test_parse_transfer_and_evaluate() {
        let cli = Cli::parse_from([
            "metaopt", "transfer", "--improver", "imp.py", "--subtask", "a", "b",
        ]);
        let Commands::Transfer(args) = cli.command else {
            panic!("expected transfer");
        };
        assert_eq!(args.subtasks, vec!["a", "b"]);

        let cli = Cli::parse_from(["metaopt", "evaluate", "cand.py", "--mode", "test"]);
        let Commands::Evaluate(args) = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(args.mode, EvalMode::Test);
    }
}
