//! Transfer evaluation: score one improver against several downstream tasks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use crate::domain::errors::{CheckpointError, EvaluationError};
use crate::domain::models::EvaluatePolicy;
use crate::domain::ports::Utility;

/// One line of the transfer report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub task: String,
    pub utility: f64,
    pub utility_test: f64,
}

/// Appends one JSON line per evaluated subtask.
#[derive(Debug, Clone)]
pub struct TransferReport {
    path: PathBuf,
}

impl TransferReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Score `improver` once with `utility` (logged, failures absorbed) and record it under `task`.
    #[instrument(skip(self, improver, utility))]
    pub async fn evaluate(
        &self,
        task: &str,
        improver: &str,
        utility: &dyn Utility,
    ) -> Result<TransferEntry, EvaluationError> {
        let score = utility.score(improver, EvaluatePolicy::logged()).await?;
        let entry = TransferEntry {
            task: task.to_string(),
            utility: score.value,
            utility_test: score.test.unwrap_or_default(),
        };
        self.append(&entry).await?;
        info!(val = entry.utility, test = entry.utility_test, "transfer evaluated");
        Ok(entry)
    }

    async fn append(&self, entry: &TransferEntry) -> Result<(), CheckpointError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| CheckpointError::io(&self.path, std::io::Error::other(e)))?;
        line.push('\n');
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CheckpointError::io(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))
    }

    /// Entries recorded so far.
    pub async fn read(&self) -> Result<Vec<TransferEntry>, CheckpointError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|_| CheckpointError::MalformedLog {
                    line: idx + 1,
                    content: line.to_string(),
                })
            })
            .collect()
    }
}
