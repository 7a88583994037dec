//! The improvement loop.
//!
//! One attempt per iteration: persist the current candidate, hand it to the
//! current improver together with fresh utility and language model
//! capabilities, then re-score whatever comes back. Accepted candidates are
//! persisted and, in iterative mode, promoted to improver. Any failure reverts
//! the improver and the run goes on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, instrument, warn};

use super::capabilities::AttemptCapabilities;
use super::code_extract::largest_code_block;
use super::evaluator::UtilityEvaluator;
use super::language_model::{GenerationCache, LanguageModel, UsageLog};
use super::meta_utility::{improved_text, IMPROVER_ENTRY};
use super::sandbox::{Invocation, SandboxExecutor};
use crate::domain::errors::AttemptError;
use crate::domain::models::{
    ArtifactRole, Config, EvalMode, EvaluatePolicy, IterationOutcome, IterationRecord, LoopPhase, RunId,
    RunState, RunSummary,
};
use crate::domain::ports::{Generator, HostCapabilities, Utility};
use crate::infrastructure::checkpoint::CheckpointStore;
use crate::infrastructure::tasks::{TaskCatalog, META_TASK};

const SEED_ROLE: &str = "You are an expert programmer, especially skilled at implementing algorithms.";

fn seed_message(utility_description: &str) -> String {
    format!(
        "You must write a script that will implement a Python algorithm to solve a problem as well as possible.\n\n\
         You will be evaluated based on the following utility function:\n\
         ```python\n{utility_description}\n```\n"
    )
}

/// Loop settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub task: String,
    pub iterative: bool,
    pub n_iterations: u32,
    pub use_seed_algorithm: bool,
    pub validate_on_resume: bool,
    /// Bound on each improver call; `None` runs it to completion
    pub improver_deadline: Option<Duration>,
    /// Utility calls available to the improver per attempt
    pub utility_budget: u32,
    pub lm_budget: u32,
    pub max_responses_per_call: u32,
    /// Sampling temperature for seed generation
    pub temperature: f64,
    pub fail_value: f64,
}

impl OptimizerSettings {
    pub fn from_config(config: &Config) -> Self {
        let utility_budget = if config.task == META_TASK {
            config.utility.meta_budget
        } else {
            config.utility.budget
        };
        Self {
            task: config.task.clone(),
            iterative: config.iterative,
            n_iterations: config.n_iterations,
            use_seed_algorithm: config.use_seed_algorithm,
            validate_on_resume: config.validate_on_resume,
            improver_deadline: config
                .sandbox
                .use_timeout_in_improver
                .then(|| Duration::from_secs(config.sandbox.improver_timeout_secs)),
            utility_budget,
            lm_budget: config.language_model.call_budget,
            max_responses_per_call: config.language_model.max_responses_per_call,
            temperature: config.language_model.temperature,
            fail_value: config.utility.fail_value,
        }
    }
}

/// Progress callbacks for front ends.
pub trait IterationObserver: Send + Sync {
    /// Called once seeding is done, with the iteration range about to run.
    fn on_start(&self, _run: &RunId, _start: u32, _end: u32) {}

    fn on_attempt(&self, _iteration: u32) {}

    fn on_iteration(&self, _record: &IterationRecord) {}
}

pub struct MetaOptimizer {
    settings: OptimizerSettings,
    executor: SandboxExecutor,
    utility: Arc<dyn Utility>,
    generator: Arc<dyn Generator>,
    cache: Option<Arc<GenerationCache>>,
    store: Arc<CheckpointStore>,
    catalog: TaskCatalog,
    observer: Option<Arc<dyn IterationObserver>>,
}

impl MetaOptimizer {
    pub fn new(
        settings: OptimizerSettings,
        executor: SandboxExecutor,
        utility: Arc<dyn Utility>,
        generator: Arc<dyn Generator>,
        store: Arc<CheckpointStore>,
        catalog: TaskCatalog,
    ) -> Self {
        Self {
            settings,
            executor,
            utility,
            generator,
            cache: None,
            store,
            catalog,
            observer: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<GenerationCache>>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn IterationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub const fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    fn evaluator(&self) -> UtilityEvaluator {
        UtilityEvaluator::new(Arc::clone(&self.utility), self.settings.utility_budget)
            .with_fail_value(self.settings.fail_value)
    }

    fn language_model(&self, budget: u32, max_responses_per_call: u32, run: &RunId) -> LanguageModel {
        LanguageModel::new(Arc::clone(&self.generator), budget, max_responses_per_call)
            .with_cache(self.cache.clone())
            .with_usage_log(Some(UsageLog::new(self.store.usage_log_path(run))))
    }

    async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }

    /// Run the loop for `run`, resuming from its persisted artifacts when `resume` is set.
    #[instrument(skip(self), fields(run = %run))]
    pub async fn run(&self, run: RunId, resume: bool) -> Result<RunSummary> {
        let (mut state, start, baseline_score) = if resume {
            self.store
                .ensure_run(&run)
                .await
                .with_context(|| format!("cannot resume run {run}"))?;
            self.resume(&run).await?
        } else {
            self.store.create_run(&run).await?;
            self.store.reset_usage_log(&run).await?;
            let (state, score) = self.seed_fresh(&run, true).await?;
            (state, 0, score)
        };

        let end = self.settings.n_iterations;
        info!(start, end, iterative = self.settings.iterative, "starting improvement loop");
        if let Some(observer) = &self.observer {
            observer.on_start(&run, start, end);
        }

        let mut iterations = Vec::new();
        for iteration in start..end {
            state.iteration = iteration;
            state.phase = LoopPhase::Attempting;
            if let Some(observer) = &self.observer {
                observer.on_attempt(iteration);
            }
            self.store
                .save_iteration(&run, iteration, ArtifactRole::Seed, &state.current_program)
                .await?;

            let started = Instant::now();
            let used_improver = state.current_improver.clone();
            let outcome = match self.attempt(&run, iteration, &state).await {
                Ok((score, candidate)) => {
                    info!(iteration, score, "improvement accepted");
                    state.accept(candidate, used_improver, self.settings.iterative);
                    IterationOutcome::Accepted { score }
                }
                Err(err) => {
                    warn!(iteration, kind = err.kind(), error = %err, "attempt reverted");
                    state.revert();
                    IterationOutcome::Reverted {
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                    }
                }
            };

            let record = IterationRecord {
                iteration,
                outcome,
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            };
            if let Some(observer) = &self.observer {
                observer.on_iteration(&record);
            }
            iterations.push(record);
        }
        state.phase = LoopPhase::Done;

        Ok(RunSummary {
            run_id: run,
            start_iteration: start,
            baseline_score,
            iterations,
            final_program: state.current_program,
            final_improver: state.current_improver,
        })
    }

    /// One improvement attempt; on success returns the score and the new candidate.
    #[allow(clippy::float_cmp)]
    #[instrument(skip(self, state), fields(run = %run))]
    async fn attempt(&self, run: &RunId, iteration: u32, state: &RunState) -> Result<(f64, String), AttemptError> {
        self.clear_cache().await;
        let evaluator = Arc::new(self.evaluator());
        let lm = Arc::new(self.language_model(
            self.settings.lm_budget,
            self.settings.max_responses_per_call,
            run,
        ));
        let capabilities = AttemptCapabilities::new(evaluator, lm);

        let improver = self
            .executor
            .load(&state.current_improver, IMPROVER_ENTRY)
            .await?;
        let invocation = Invocation::new()
            .arg(state.current_program.as_str())
            .args(capabilities.descriptors());
        let host: Arc<dyn HostCapabilities> = Arc::new(capabilities);
        let value = self
            .executor
            .invoke(Arc::new(improver), invocation, host, self.settings.improver_deadline)
            .await?;
        let candidate = improved_text(value)?;
        debug!(bytes = candidate.len(), "improver returned a candidate");

        self.clear_cache().await;
        let score = self
            .evaluator()
            .evaluate_detailed(&candidate, EvaluatePolicy::logged())
            .await?;
        if score.value == 0.0 {
            return Err(AttemptError::Rejected { score: score.value });
        }
        self.store
            .save_iteration(run, iteration, ArtifactRole::Improved, &candidate)
            .await?;
        Ok((score.value, candidate))
    }

    /// Rebuild state from the improved artifacts of `run`.
    async fn resume(&self, run: &RunId) -> Result<(RunState, u32, Option<f64>)> {
        let mut seeds = self.store.list_seeds(run).await?;
        let start = self.store.resume_start(run).await?;
        info!(seeds = seeds.len(), start, "resuming run");
        let seed_iterations = seeds.clone();

        let Some(candidate) = self.pop_valid_seed(run, &mut seeds).await else {
            warn!("no persisted artifact could be restored, seeding fresh");
            let (mut state, _) = self.seed_fresh(run, false).await?;
            state.seed_iterations = seed_iterations;
            return Ok((state, start, None));
        };

        let seed_improver = self.catalog.seed_improver().await?;
        let mut state = if self.settings.iterative {
            let previous = match self.pop_valid_seed(run, &mut seeds).await {
                Some(previous) => previous,
                None => seed_improver,
            };
            let mut state = RunState::new(run.clone(), candidate.clone(), candidate);
            state.previous_improver = previous;
            state
        } else {
            RunState::new(run.clone(), candidate, seed_improver)
        };
        state.iteration = start;
        state.seed_iterations = seed_iterations;
        Ok((state, start, None))
    }

    /// Highest-indexed artifact that still loads and, when enabled, scores without error.
    async fn pop_valid_seed(&self, run: &RunId, seeds: &mut Vec<u32>) -> Option<String> {
        while let Some(iteration) = seeds.pop() {
            match self.restore(run, iteration).await {
                Ok(text) => {
                    info!(iteration, "restored persisted artifact");
                    return Some(text);
                }
                Err(err) => warn!(iteration, error = %err, "persisted artifact rejected"),
            }
        }
        None
    }

    async fn restore(&self, run: &RunId, iteration: u32) -> Result<String> {
        let text = self
            .store
            .load_iteration(run, iteration, ArtifactRole::Improved)
            .await?;
        if text.is_empty() {
            bail!("artifact is empty");
        }
        if self.settings.iterative {
            self.executor.load(&text, IMPROVER_ENTRY).await?;
        }
        if self.settings.validate_on_resume {
            self.evaluator()
                .evaluate(&text, EvaluatePolicy::strict())
                .await?;
        }
        Ok(text)
    }

    /// Seed improver and seed candidate; the candidate is scored once for the log when `log_baseline`.
    async fn seed_fresh(&self, run: &RunId, log_baseline: bool) -> Result<(RunState, Option<f64>)> {
        let improver = self.catalog.seed_improver().await?;
        let candidate = self.seed_candidate(run).await?;

        let policy = if log_baseline {
            EvaluatePolicy::logged()
        } else {
            EvaluatePolicy::improver_call(EvalMode::Val)
        };
        let score = self
            .evaluator()
            .evaluate_detailed(&candidate, policy)
            .await
            .context("failed to evaluate the seed candidate")?;
        info!(score = score.value, test = ?score.test, "seed candidate evaluated");

        Ok((RunState::new(run.clone(), candidate, improver), Some(score.value)))
    }

    async fn seed_candidate(&self, run: &RunId) -> Result<String> {
        let task = self.settings.task.as_str();
        if self.settings.use_seed_algorithm {
            if task == META_TASK {
                return self.catalog.seed_improver().await;
            }
            if let Some(text) = self.catalog.seed_algorithm(task).await? {
                return Ok(text);
            }
        }

        let text = self.generate_seed(run).await?;
        if self.settings.use_seed_algorithm {
            self.catalog.write_seed_algorithm(task, &text).await?;
        }
        Ok(text)
    }

    /// Ask the generative service for a first candidate.
    pub async fn generate_seed(&self, run: &RunId) -> Result<String> {
        info!(task = %self.settings.task, "generating seed algorithm");
        let lm = self.language_model(1, 1, run);
        generate_seed_algorithm(&lm, self.utility.description(), self.settings.temperature).await
    }
}

/// One completion asking for an algorithm that does well under `utility_description`.
pub async fn generate_seed_algorithm(
    lm: &LanguageModel,
    utility_description: &str,
    temperature: f64,
) -> Result<String> {
    let responses = lm
        .prompt(SEED_ROLE, &seed_message(utility_description), 1, temperature)
        .await
        .context("seed generation failed")?;
    responses
        .first()
        .and_then(|text| largest_code_block(text))
        .filter(|code| !code.trim().is_empty())
        .context("seed generation returned no code block")
}

impl std::fmt::Debug for MetaOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaOptimizer")
            .field("settings", &self.settings)
            .field("utility", &self.utility.name())
            .field("generator", &self.generator.name())
            .finish_non_exhaustive()
    }
}
