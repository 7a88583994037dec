//! Task directory lookups
//!
//! Layout under the tasks root:
//! - `<task>/utility.<ext>`: public fingerprint shown to improvers
//! - `<task>/secret_utility.<ext>`: scoring program, falls back to the public file
//! - `<task>/seed_algorithm.<ext>`: optional starting candidate

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Task name whose seed algorithm is the seed improver.
pub const META_TASK: &str = "meta_optimization";

/// Built-in improver used when the meta task ships no seed of its own.
pub const DEFAULT_SEED_IMPROVER: &str = include_str!("../../assets/python/seed_improver.py");

#[derive(Debug, Clone)]
pub struct TaskCatalog {
    root: PathBuf,
    extension: String,
}

impl TaskCatalog {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_file(&self, task: &str, stem: &str) -> PathBuf {
        self.root.join(task).join(format!("{stem}.{}", self.extension))
    }

    async fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// Public utility text; empty when the task publishes none.
    pub async fn utility_description(&self, task: &str) -> Result<String> {
        Ok(self
            .read_optional(&self.task_file(task, "utility"))
            .await?
            .unwrap_or_default())
    }

    /// Program that actually scores candidates.
    pub async fn scoring_program(&self, task: &str) -> Result<String> {
        if let Some(text) = self.read_optional(&self.task_file(task, "secret_utility")).await? {
            return Ok(text);
        }
        let public = self.task_file(task, "utility");
        self.read_optional(&public)
            .await?
            .with_context(|| format!("task `{task}` has no scoring program under {}", self.root.display()))
    }

    pub async fn seed_algorithm(&self, task: &str) -> Result<Option<String>> {
        self.read_optional(&self.task_file(task, "seed_algorithm")).await
    }

    pub async fn write_seed_algorithm(&self, task: &str, text: &str) -> Result<PathBuf> {
        let path = self.task_file(task, "seed_algorithm");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "seed algorithm written");
        Ok(path)
    }

    /// The meta task's seed improver, or the bundled default.
    pub async fn seed_improver(&self) -> Result<String> {
        Ok(self
            .seed_algorithm(META_TASK)
            .await?
            .unwrap_or_else(|| DEFAULT_SEED_IMPROVER.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scoring_program_falls_back_to_public_utility() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TaskCatalog::new(dir.path(), "py");
        std::fs::create_dir_all(dir.path().join("parity")).unwrap();
        std::fs::write(dir.path().join("parity/utility.py"), "public").unwrap();

        assert_eq!(catalog.scoring_program("parity").await.unwrap(), "public");
        std::fs::write(dir.path().join("parity/secret_utility.py"), "secret").unwrap();
        assert_eq!(catalog.scoring_program("parity").await.unwrap(), "secret");
        assert!(catalog.scoring_program("missing").await.is_err());
        assert_eq!(catalog.utility_description("missing").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_seed_improver_prefers_task_file() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TaskCatalog::new(dir.path(), "py");
        assert!(catalog.seed_improver().await.unwrap().contains("def improve_algorithm"));

        catalog.write_seed_algorithm(META_TASK, "custom").await.unwrap();
        assert_eq!(catalog.seed_improver().await.unwrap(), "custom");
        assert_eq!(catalog.seed_algorithm("other").await.unwrap(), None);
    }
}
