use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::domain::errors::CheckpointError;
use crate::domain::models::{ArtifactRole, RunId};

/// Aggregate score log file name.
pub const SCORE_LOG: &str = "meta_utility_log.txt";

/// Generation usage log file name.
pub const USAGE_LOG: &str = "usage_log.jsonl";

/// One `val,test` line of the score log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreEntry {
    pub val: f64,
    pub test: f64,
}

/// Summary of a run directory.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub run_id: RunId,
    /// Highest accepted iteration, if any
    pub last_iteration: Option<u32>,
    pub latest_score: Option<ScoreEntry>,
    pub evaluations: usize,
}

/// Filesystem store for run artifacts.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    extension: String,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.root.join(run.as_str())
    }

    pub fn artifact_path(&self, run: &RunId, iteration: u32, role: ArtifactRole) -> PathBuf {
        self.run_dir(run)
            .join(format!("{}_{iteration}.{}", role.prefix(), self.extension))
    }

    pub fn score_log_path(&self, run: &RunId) -> PathBuf {
        self.run_dir(run).join(SCORE_LOG)
    }

    pub fn usage_log_path(&self, run: &RunId) -> PathBuf {
        self.run_dir(run).join(USAGE_LOG)
    }

    /// Create the run directory if needed.
    pub async fn create_run(&self, run: &RunId) -> Result<PathBuf, CheckpointError> {
        let dir = self.run_dir(run);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CheckpointError::io(&dir, e))?;
        Ok(dir)
    }

    /// Fail unless the run directory exists.
    pub async fn ensure_run(&self, run: &RunId) -> Result<(), CheckpointError> {
        match tokio::fs::metadata(self.run_dir(run)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(CheckpointError::MissingRun(run.to_string())),
        }
    }

    /// Persist one artifact atomically: a failed write leaves the previous file intact.
    #[instrument(skip(self, text), fields(run = %run, bytes = text.len()))]
    pub async fn save_iteration(
        &self,
        run: &RunId,
        iteration: u32,
        role: ArtifactRole,
        text: &str,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.artifact_path(run, iteration, role);
        write_atomic(path.clone(), text.as_bytes().to_vec()).await?;
        debug!(path = %path.display(), "artifact saved");
        Ok(path)
    }

    pub async fn load_iteration(
        &self,
        run: &RunId,
        iteration: u32,
        role: ArtifactRole,
    ) -> Result<String, CheckpointError> {
        let path = self.artifact_path(run, iteration, role);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CheckpointError::io(path, e))
    }

    /// Iterations with an improved artifact, ascending.
    ///
    /// Only `improved_algorithm_<n>.<ext>` counts; meta-utility samples carry
    /// two numeric suffixes and are skipped.
    pub async fn list_seeds(&self, run: &RunId) -> Result<Vec<u32>, CheckpointError> {
        let mut seeds: Vec<u32> = self
            .file_names(&self.run_dir(run))
            .await?
            .iter()
            .filter_map(|name| self.parse_improved(name))
            .collect();
        seeds.sort_unstable();
        seeds.dedup();
        Ok(seeds)
    }

    /// One past the highest improved iteration, 0 when there is none.
    pub async fn resume_start(&self, run: &RunId) -> Result<u32, CheckpointError> {
        Ok(self
            .list_seeds(run)
            .await?
            .last()
            .map_or(0, |last| last + 1))
    }

    fn parse_improved(&self, name: &str) -> Option<u32> {
        let stem = name.strip_suffix(&format!(".{}", self.extension))?;
        let index = stem.strip_prefix(ArtifactRole::Improved.prefix())?.strip_prefix('_')?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        index.parse().ok()
    }

    /// Persist one meta-utility trial.
    pub async fn save_sample(
        &self,
        run: &RunId,
        elapsed_secs: i64,
        trial: u32,
        base: &str,
        improved: &str,
    ) -> Result<(), CheckpointError> {
        let dir = self.run_dir(run);
        let base_path = dir.join(format!("base_algorithm_{elapsed_secs}_{trial}.{}", self.extension));
        let improved_path = dir.join(format!(
            "improved_algorithm_{elapsed_secs}_{trial}.{}",
            self.extension
        ));
        write_atomic(base_path, base.as_bytes().to_vec()).await?;
        write_atomic(improved_path, improved.as_bytes().to_vec()).await
    }

    pub async fn append_score_log(&self, run: &RunId, val: f64, test: f64) -> Result<(), CheckpointError> {
        let path = self.score_log_path(run);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;
        file.write_all(format!("{val},{test}\n").as_bytes())
            .await
            .map_err(|e| CheckpointError::io(&path, e))
    }

    /// Score log entries in order; a missing log is empty.
    pub async fn read_score_log(&self, run: &RunId) -> Result<Vec<ScoreEntry>, CheckpointError> {
        let path = self.score_log_path(run);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(path, e)),
        };
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| parse_score_line(line).ok_or_else(|| CheckpointError::MalformedLog {
                line: idx + 1,
                content: line.to_string(),
            }))
            .collect()
    }

    /// Truncate the usage log at the start of a run.
    pub async fn reset_usage_log(&self, run: &RunId) -> Result<PathBuf, CheckpointError> {
        let path = self.usage_log_path(run);
        tokio::fs::write(&path, b"")
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;
        Ok(path)
    }

    /// Run directories whose names start with a digit, oldest first.
    async fn run_ids(&self) -> Result<Vec<RunId>, CheckpointError> {
        let mut runs: Vec<(i64, RunId)> = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&self.root, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::io(&self.root, e))?
        {
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            let name = entry.file_name().to_string_lossy().into_owned();
            let run = RunId::from(name);
            if let (true, Some(started)) = (is_dir, run.started_at()) {
                runs.push((started, run));
            }
        }
        runs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));
        Ok(runs.into_iter().map(|(_, run)| run).collect())
    }

    /// The run with the numerically greatest leading integer.
    pub async fn latest_run(&self) -> Result<Option<RunId>, CheckpointError> {
        Ok(self.run_ids().await?.pop())
    }

    /// Every run with its last accepted iteration and latest score, oldest first.
    pub async fn list_runs(&self) -> Result<Vec<RunInfo>, CheckpointError> {
        let mut infos = Vec::new();
        for run in self.run_ids().await? {
            let last_iteration = self.list_seeds(&run).await?.last().copied();
            let scores = self.read_score_log(&run).await.unwrap_or_default();
            infos.push(RunInfo {
                last_iteration,
                latest_score: scores.last().copied(),
                evaluations: scores.len(),
                run_id: run,
            });
        }
        Ok(infos)
    }

    async fn file_names(&self, dir: &Path) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(dir, e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::io(dir, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

fn parse_score_line(line: &str) -> Option<ScoreEntry> {
    let (val, test) = line.trim().split_once(',')?;
    Some(ScoreEntry {
        val: val.trim().parse().ok()?,
        test: test.trim().parse().ok()?,
    })
}

async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<(), CheckpointError> {
    tokio::task::spawn_blocking(move || {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CheckpointError::io(dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| CheckpointError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| CheckpointError::io(&path, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| CheckpointError::io(PathBuf::new(), std::io::Error::other(e)))?
}

/// Where a utility appends its `val,test` pairs.
#[derive(Debug, Clone)]
pub struct ScoreLog {
    store: Arc<CheckpointStore>,
    run: RunId,
}

impl ScoreLog {
    pub const fn new(store: Arc<CheckpointStore>, run: RunId) -> Self {
        Self { store, run }
    }

    pub const fn run(&self) -> &RunId {
        &self.run
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub async fn append(&self, val: f64, test: f64) -> Result<(), CheckpointError> {
        self.store.append_score_log(&self.run, val, test).await
    }
}
