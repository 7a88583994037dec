//! Utility backed by a scoring program run in the sandbox.
//!
//! The scoring program defines `utility(algorithm_str, mode)` and returns a
//! number. It runs in its own worker with no host capabilities.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::domain::errors::{EvaluationError, SandboxError};
use crate::domain::models::{EvalMode, EvaluatePolicy};
use crate::domain::ports::{HostCapabilities, NoCapabilities, Utility, UtilityScore};
use crate::infrastructure::checkpoint::ScoreLog;
use crate::services::sandbox::{Invocation, LoadedProgram, SandboxExecutor};

/// Entry point every scoring program defines.
pub const UTILITY_ENTRY: &str = "utility";

pub struct ProgramUtility {
    name: String,
    description: String,
    source: String,
    executor: SandboxExecutor,
    deadline: Option<Duration>,
    score_log: Option<ScoreLog>,
    program: OnceCell<Arc<LoadedProgram>>,
}

impl ProgramUtility {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: source.into(),
            executor,
            deadline: None,
            score_log: None,
            program: OnceCell::new(),
        }
    }

    /// Bound each scoring run.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Append `val,test` to this log whenever a logged evaluation completes.
    #[must_use]
    pub fn with_score_log(mut self, log: Option<ScoreLog>) -> Self {
        self.score_log = log;
        self
    }

    async fn program(&self) -> Result<Arc<LoadedProgram>, SandboxError> {
        self.program
            .get_or_try_init(|| async {
                self.executor
                    .load(&self.source, UTILITY_ENTRY)
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned()
    }

    #[instrument(skip(self, candidate), fields(utility = %self.name, mode = %mode))]
    async fn run(&self, candidate: &str, mode: EvalMode) -> Result<f64, EvaluationError> {
        let program = self.program().await?;
        let invocation = Invocation::new().arg(candidate).arg(mode.as_str());
        let host: Arc<dyn HostCapabilities> = Arc::new(NoCapabilities);
        let value = self
            .executor
            .invoke(program, invocation, host, self.deadline)
            .await?;
        let score = as_score(&value)?;
        debug!(score, "scoring program finished");
        Ok(score)
    }
}

fn as_score(value: &Value) -> Result<f64, EvaluationError> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    score
        .filter(|s| s.is_finite())
        .ok_or_else(|| EvaluationError::InvalidScore(value.to_string()))
}

#[async_trait]
impl Utility for ProgramUtility {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn score(&self, candidate: &str, policy: EvaluatePolicy) -> Result<UtilityScore, EvaluationError> {
        let value = self.run(candidate, policy.mode).await?;
        if !policy.log_usage {
            return Ok(UtilityScore::value(value));
        }

        let test = self.run(candidate, EvalMode::Test).await?;
        if let Some(log) = &self.score_log {
            if let Err(err) = log.append(value, test).await {
                warn!(error = %err, "failed to append score log");
            }
        }
        Ok(UtilityScore {
            value,
            test: Some(test),
        })
    }
}

impl std::fmt::Debug for ProgramUtility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramUtility")
            .field("name", &self.name)
            .field("deadline", &self.deadline)
            .field("logged", &self.score_log.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_score_accepts_finite_numbers_only() {
        assert!((as_score(&json!(0.5)).unwrap() - 0.5).abs() < f64::EPSILON);
        assert!((as_score(&json!(3)).unwrap() - 3.0).abs() < f64::EPSILON);
        assert!((as_score(&json!(true)).unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(matches!(as_score(&json!("0.5")), Err(EvaluationError::InvalidScore(_))));
        assert!(matches!(as_score(&Value::Null), Err(EvaluationError::InvalidScore(_))));
    }
}
