//! Composition root: wires configuration into the services a command needs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::adapters::generators::{AnthropicApiConfig, AnthropicGenerator, MockGenerator};
use crate::adapters::runtimes::InterpreterRuntime;
use crate::adapters::utilities::ProgramUtility;
use crate::domain::models::{Config, EvalMode, EvaluatePolicy, GeneratorProvider, RunId, RunSummary};
use crate::domain::ports::{Generator, Runtime, Utility, UtilityScore};
use crate::infrastructure::checkpoint::{CheckpointStore, RunInfo, ScoreLog};
use crate::infrastructure::tasks::{TaskCatalog, META_TASK};
use crate::services::{
    generate_seed_algorithm, GenerationCache, IterationObserver, LanguageModel, MetaOptimizer,
    MetaUtility, MetaUtilitySettings, OptimizerSettings, SandboxExecutor, TransferEntry,
    TransferReport, UsageLog,
};

/// Where a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStart {
    Fresh,
    Resume(RunId),
    ResumeLast,
}

/// Everything shared by the commands of one process.
pub struct OptimizationSession {
    config: Config,
    executor: SandboxExecutor,
    generator: Arc<dyn Generator>,
    cache: Option<Arc<GenerationCache>>,
    store: Arc<CheckpointStore>,
    catalog: TaskCatalog,
}

impl OptimizationSession {
    pub fn from_config(config: Config) -> Result<Self> {
        let generator: Arc<dyn Generator> = match config.generator.provider {
            GeneratorProvider::AnthropicApi => Arc::new(
                AnthropicGenerator::new(AnthropicApiConfig::from(&config.generator))
                    .context("failed to build the Anthropic generator")?,
            ),
            GeneratorProvider::Mock => Arc::new(MockGenerator::with_texts(
                config.generator.mock_responses.clone(),
            )),
        };
        Ok(Self::with_generator(config, generator))
    }

    /// Build a session around an explicit generator.
    pub fn with_generator(config: Config, generator: Arc<dyn Generator>) -> Self {
        let runtime: Arc<dyn Runtime> = Arc::new(InterpreterRuntime::from_config(&config.runtime));
        let executor = SandboxExecutor::new(
            runtime,
            &config.sandbox,
            PathBuf::from(&config.paths.scratch_dir),
        );
        let extension = config.runtime.extension.clone();
        let cache = config
            .language_model
            .use_cache
            .then(GenerationCache::shared);
        Self {
            store: Arc::new(CheckpointStore::new(&config.paths.results_dir, extension.clone())),
            catalog: TaskCatalog::new(&config.paths.tasks_dir, extension),
            executor,
            generator,
            cache,
            config,
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    pub const fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub const fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    fn utility_deadline(&self) -> Option<Duration> {
        self.config.utility.timeout_secs.map(Duration::from_secs)
    }

    /// Scoring program of `task`, appending to `score_log` when given.
    pub async fn program_utility(&self, task: &str, score_log: Option<ScoreLog>) -> Result<ProgramUtility> {
        let source = self.catalog.scoring_program(task).await?;
        let description = self.catalog.utility_description(task).await?;
        Ok(ProgramUtility::new(task, description, source, self.executor.clone())
            .with_deadline(self.utility_deadline())
            .with_score_log(score_log))
    }

    /// Meta utility over `subtask`, persisting samples under `run` when given.
    pub async fn meta_utility(&self, subtask: &str, run: Option<&RunId>) -> Result<MetaUtility> {
        let downstream: Arc<dyn Utility> = Arc::new(self.program_utility(subtask, None).await?);
        let base_algorithm = self.base_algorithm(subtask, downstream.description(), run).await?;
        let description = self.catalog.utility_description(META_TASK).await?;
        let settings = MetaUtilitySettings {
            downstream_budget: self.config.utility.budget,
            lm_budget: self.config.language_model.call_budget,
            max_responses_per_call: self.config.language_model.max_responses_per_call,
            n_tests: self.config.utility.meta_tests,
            trial_deadline: self
                .config
                .sandbox
                .use_timeout_in_improver
                .then(|| Duration::from_secs(self.config.sandbox.improver_timeout_secs)),
            fail_value: self.config.utility.fail_value,
        };

        let mut utility = MetaUtility::new(
            description,
            downstream,
            base_algorithm,
            self.executor.clone(),
            Arc::clone(&self.generator),
            settings,
        )
        .with_cache(self.cache.clone());
        if let Some(run) = run {
            utility = utility
                .with_artifacts(Arc::clone(&self.store), run.clone())
                .with_usage_log(Some(UsageLog::new(self.store.usage_log_path(run))));
        }
        Ok(utility)
    }

    /// Seed algorithm of a downstream task, generated and written back when missing.
    async fn base_algorithm(&self, subtask: &str, description: &str, run: Option<&RunId>) -> Result<String> {
        if let Some(text) = self.catalog.seed_algorithm(subtask).await? {
            return Ok(text);
        }
        info!(subtask, "no seed algorithm on disk, generating one");
        let usage_log = run.map(|run| UsageLog::new(self.store.usage_log_path(run)));
        let lm = LanguageModel::new(Arc::clone(&self.generator), 1, 1)
            .with_cache(self.cache.clone())
            .with_usage_log(usage_log);
        let text = generate_seed_algorithm(&lm, description, self.config.language_model.temperature).await?;
        self.catalog.write_seed_algorithm(subtask, &text).await?;
        Ok(text)
    }

    /// The utility the loop optimizes against for the configured task.
    pub async fn task_utility(&self, task: &str, run: Option<&RunId>) -> Result<Arc<dyn Utility>> {
        if task == META_TASK {
            Ok(Arc::new(self.meta_utility(&self.config.subtask, run).await?))
        } else {
            let log = run.map(|run| ScoreLog::new(Arc::clone(&self.store), run.clone()));
            Ok(Arc::new(self.program_utility(task, log).await?))
        }
    }

    /// Pick the run identifier and whether it is a resume.
    pub async fn resolve_run(&self, start: RunStart) -> Result<(RunId, bool)> {
        match start {
            RunStart::Fresh => Ok((
                RunId::now(
                    self.config.iterative,
                    self.config.use_seed_algorithm,
                    self.config.use_improver,
                    &self.config.subtask,
                ),
                false,
            )),
            RunStart::Resume(run) => Ok((RunId::parse(run.as_str())?, true)),
            RunStart::ResumeLast => {
                let run = self
                    .store
                    .latest_run()
                    .await?
                    .with_context(|| format!("no runs found under {}", self.store.root().display()))?;
                Ok((run, true))
            }
        }
    }

    pub async fn optimizer(&self, run: &RunId) -> Result<MetaOptimizer> {
        self.store.create_run(run).await?;
        let utility = self.task_utility(&self.config.task, Some(run)).await?;
        Ok(MetaOptimizer::new(
            OptimizerSettings::from_config(&self.config),
            self.executor.clone(),
            utility,
            Arc::clone(&self.generator),
            Arc::clone(&self.store),
            self.catalog.clone(),
        )
        .with_cache(self.cache.clone()))
    }

    /// Run the improvement loop.
    #[instrument(skip(self, observer))]
    pub async fn run(
        &self,
        start: RunStart,
        observer: Option<Arc<dyn IterationObserver>>,
    ) -> Result<RunSummary> {
        let (run, resume) = self.resolve_run(start).await?;
        if resume {
            self.store
                .ensure_run(&run)
                .await
                .with_context(|| format!("cannot resume run {run}"))?;
        }
        info!(run = %run, resume, task = %self.config.task, "starting run");
        let mut optimizer = self.optimizer(&run).await?;
        if let Some(observer) = observer {
            optimizer = optimizer.with_observer(observer);
        }
        optimizer.run(run, resume).await
    }

    /// Score one candidate file against `task` with failures propagated.
    pub async fn evaluate(&self, path: &Path, task: &str, mode: EvalMode) -> Result<UtilityScore> {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let utility = self.task_utility(task, None).await?;
        let policy = EvaluatePolicy {
            mode,
            ..EvaluatePolicy::strict()
        };
        utility
            .score(&source, policy)
            .await
            .with_context(|| format!("evaluation of {} failed", path.display()))
    }

    /// Score an improver file on each subtask, appending to `output`.
    pub async fn transfer(&self, improver: &Path, subtasks: &[String], output: &Path) -> Result<Vec<TransferEntry>> {
        let source = tokio::fs::read_to_string(improver)
            .await
            .with_context(|| format!("failed to read {}", improver.display()))?;
        let report = TransferReport::new(output);
        let mut entries = Vec::with_capacity(subtasks.len());
        for subtask in subtasks.iter().filter(|s| s.as_str() != META_TASK) {
            let utility = self.meta_utility(subtask, None).await?;
            entries.push(report.evaluate(subtask, &source, &utility).await?);
        }
        Ok(entries)
    }

    pub async fn runs(&self) -> Result<Vec<RunInfo>> {
        Ok(self.store.list_runs().await?)
    }
}

impl std::fmt::Debug for OptimizationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationSession")
            .field("task", &self.config.task)
            .field("generator", &self.generator.name())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
