//! Utility that scores an improver by what it does to a downstream task.
//!
//! Each trial loads the improver, runs it against the downstream base
//! algorithm with a fresh language model and a fresh downstream evaluation
//! context, then scores the text it returns with the downstream utility.
//! The result is the average over all trials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::capabilities::AttemptCapabilities;
use super::evaluator::UtilityEvaluator;
use super::language_model::{GenerationCache, LanguageModel, UsageLog};
use super::sandbox::{Invocation, LoadedProgram, SandboxExecutor};
use crate::domain::errors::{EvaluationError, SandboxError};
use crate::domain::models::{EvalMode, EvaluatePolicy, RunId};
use crate::domain::ports::{Generator, HostCapabilities, Utility, UtilityScore};
use crate::infrastructure::checkpoint::CheckpointStore;

/// Entry point every improver defines.
pub const IMPROVER_ENTRY: &str = "improve_algorithm";

/// Text returned by an improver; `null` counts as no improvement.
pub(crate) fn improved_text(value: Value) -> Result<String, SandboxError> {
    match value {
        Value::String(text) => Ok(text),
        Value::Null => Ok(String::new()),
        other => Err(SandboxError::Protocol(format!(
            "improver returned {other} instead of program text"
        ))),
    }
}

/// Budgets and trial count for one meta utility.
#[derive(Debug, Clone, Copy)]
pub struct MetaUtilitySettings {
    /// Downstream utility calls available to each trial
    pub downstream_budget: u32,
    /// Language model calls available to each trial
    pub lm_budget: u32,
    pub max_responses_per_call: u32,
    pub n_tests: u32,
    pub trial_deadline: Option<Duration>,
    pub fail_value: f64,
}

pub struct MetaUtility {
    description: String,
    downstream: Arc<dyn Utility>,
    base_algorithm: String,
    executor: SandboxExecutor,
    generator: Arc<dyn Generator>,
    cache: Option<Arc<GenerationCache>>,
    settings: MetaUtilitySettings,
    artifacts: Option<(Arc<CheckpointStore>, RunId)>,
    usage_log: Option<UsageLog>,
}

enum Trial {
    Text(String),
    /// A failure that zeroes the whole evaluation
    Abort,
}

impl MetaUtility {
    pub fn new(
        description: impl Into<String>,
        downstream: Arc<dyn Utility>,
        base_algorithm: impl Into<String>,
        executor: SandboxExecutor,
        generator: Arc<dyn Generator>,
        settings: MetaUtilitySettings,
    ) -> Self {
        Self {
            description: description.into(),
            downstream,
            base_algorithm: base_algorithm.into(),
            executor,
            generator,
            cache: None,
            settings,
            artifacts: None,
            usage_log: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<GenerationCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Persist trial samples and the aggregate score log under `run`.
    #[must_use]
    pub fn with_artifacts(mut self, store: Arc<CheckpointStore>, run: RunId) -> Self {
        self.artifacts = Some((store, run));
        self
    }

    #[must_use]
    pub fn with_usage_log(mut self, log: Option<UsageLog>) -> Self {
        self.usage_log = log;
        self
    }

    pub const fn settings(&self) -> &MetaUtilitySettings {
        &self.settings
    }

    pub fn base_algorithm(&self) -> &str {
        &self.base_algorithm
    }

    fn trial_capabilities(&self) -> AttemptCapabilities {
        let evaluator = UtilityEvaluator::new(Arc::clone(&self.downstream), self.settings.downstream_budget)
            .with_fail_value(self.settings.fail_value);
        let lm = LanguageModel::new(
            Arc::clone(&self.generator),
            self.settings.lm_budget,
            self.settings.max_responses_per_call,
        )
        .with_cache(self.cache.clone())
        .with_usage_log(self.usage_log.clone());
        AttemptCapabilities::new(Arc::new(evaluator), Arc::new(lm))
    }

    async fn run_trial(&self, program: &Arc<LoadedProgram>) -> Result<String, SandboxError> {
        let capabilities = self.trial_capabilities();
        let invocation = Invocation::new()
            .arg(self.base_algorithm.as_str())
            .args(capabilities.descriptors());
        let host: Arc<dyn HostCapabilities> = Arc::new(capabilities);
        let value = self
            .executor
            .invoke(Arc::clone(program), invocation, host, self.settings.trial_deadline)
            .await?;
        improved_text(value)
    }

    /// Apply the failure matrix to one trial outcome.
    fn settle<T>(
        result: Result<T, EvaluationError>,
        policy: EvaluatePolicy,
        fallback: T,
    ) -> Result<Option<T>, EvaluationError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if !policy.handle_exceptions => Err(err),
            Err(err) if !policy.log_usage => {
                warn!(error = %err, "meta utility trial failed, scoring 0");
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "meta utility trial failed, counting fail value");
                Ok(Some(fallback))
            }
        }
    }

    async fn improve(&self, improver: &str, policy: EvaluatePolicy) -> Result<Vec<Trial>, EvaluationError> {
        let n_tests = self.settings.n_tests as usize;
        let program = match self.executor.load(improver, IMPROVER_ENTRY).await {
            Ok(program) => Arc::new(program),
            Err(err) => {
                // every trial would fail the same way
                return Ok(match Self::settle(Err(err.into()), policy, ())? {
                    Some(()) => (0..n_tests).map(|_| Trial::Text(String::new())).collect(),
                    None => vec![Trial::Abort],
                });
            }
        };

        let mut trials = Vec::with_capacity(n_tests);
        for trial in 0..self.settings.n_tests {
            let outcome = self.run_trial(&program).await.map_err(EvaluationError::from);
            debug!(trial, ok = outcome.is_ok(), "improver trial finished");
            match Self::settle(outcome, policy, String::new())? {
                Some(text) => trials.push(Trial::Text(text)),
                None => {
                    trials.push(Trial::Abort);
                    break;
                }
            }
        }
        Ok(trials)
    }

    async fn downstream_score(
        &self,
        text: &str,
        mode: EvalMode,
        policy: EvaluatePolicy,
    ) -> Result<Option<f64>, EvaluationError> {
        let evaluator = UtilityEvaluator::new(Arc::clone(&self.downstream), self.settings.downstream_budget);
        let inner = EvaluatePolicy {
            mode,
            log_usage: false,
            handle_exceptions: false,
        };
        Self::settle(evaluator.evaluate(text, inner).await, policy, self.settings.fail_value)
    }

    fn elapsed_secs(run: &RunId) -> i64 {
        run.started_at()
            .map_or(0, |started| Utc::now().timestamp() - started)
    }
}

#[async_trait]
impl Utility for MetaUtility {
    fn name(&self) -> &str {
        "meta_utility"
    }

    fn description(&self) -> &str {
        &self.description
    }

    #[instrument(skip(self, improver), fields(bytes = improver.len(), log = policy.log_usage))]
    async fn score(&self, improver: &str, policy: EvaluatePolicy) -> Result<UtilityScore, EvaluationError> {
        if improver.is_empty() {
            debug!("empty improver scores 0");
            return Ok(UtilityScore::value(0.0));
        }
        let n_tests = f64::from(self.settings.n_tests.max(1));
        let elapsed = self.artifacts.as_ref().map(|(_, run)| Self::elapsed_secs(run));

        let mut texts = Vec::new();
        for trial in self.improve(improver, policy).await? {
            match trial {
                Trial::Text(text) => texts.push(text),
                Trial::Abort => return Ok(UtilityScore::value(0.0)),
            }
        }

        let mut expected_val = 0.0;
        let mut expected_test = 0.0;
        for (idx, text) in texts.iter().enumerate() {
            if text.is_empty() {
                continue;
            }
            if let (true, Some((store, run)), Some(elapsed)) = (policy.log_usage, &self.artifacts, elapsed) {
                let trial = u32::try_from(idx).unwrap_or(u32::MAX);
                if let Err(err) = store
                    .save_sample(run, elapsed, trial, &self.base_algorithm, text)
                    .await
                {
                    warn!(error = %err, "failed to save meta utility sample");
                }
            }

            let Some(val) = self.downstream_score(text, policy.mode, policy).await? else {
                return Ok(UtilityScore::value(0.0));
            };
            expected_val += val / n_tests;

            if policy.log_usage {
                let Some(test) = self.downstream_score(text, EvalMode::Test, policy).await? else {
                    return Ok(UtilityScore::value(0.0));
                };
                expected_test += test / n_tests;
            }
        }

        if policy.log_usage {
            if let Some((store, run)) = &self.artifacts {
                store.append_score_log(run, expected_val, expected_test).await?;
            }
            info!(val = expected_val, test = expected_test, "meta utility evaluated");
        }
        Ok(UtilityScore {
            value: expected_val,
            test: policy.log_usage.then_some(expected_test),
        })
    }
}

impl std::fmt::Debug for MetaUtility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaUtility")
            .field("downstream", &self.downstream.name())
            .field("settings", &self.settings)
            .field("artifacts", &self.artifacts.as_ref().map(|(_, run)| run))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_improved_text_accepts_strings_and_null() {
        assert_eq!(improved_text(json!("def f(): pass")).unwrap(), "def f(): pass");
        assert_eq!(improved_text(Value::Null).unwrap(), "");
        assert!(matches!(improved_text(json!(3)), Err(SandboxError::Protocol(_))));
    }

    #[test]
    fn test_settle_follows_failure_matrix() {
        let fail = || Err::<f64, _>(EvaluationError::InvalidScore("x".to_string()));

        assert!(MetaUtility::settle(fail(), EvaluatePolicy::strict(), 0.0).is_err());
        assert_eq!(
            MetaUtility::settle(fail(), EvaluatePolicy::improver_call(EvalMode::Val), 0.0).unwrap(),
            None
        );
        assert_eq!(MetaUtility::settle(fail(), EvaluatePolicy::logged(), 0.0).unwrap(), Some(0.0));
        assert_eq!(MetaUtility::settle(Ok(0.4), EvaluatePolicy::strict(), 0.0).unwrap(), Some(0.4));
    }
}
