//! Turns candidate source text into a loaded, isolated program.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use nix::errno::Errno;
use tempfile::TempDir;
use tracing::{debug, instrument, warn};

use super::guard::ExecutionGuard;
use crate::domain::errors::{LoadError, SandboxError, SandboxViolation};
use crate::domain::ports::{Materialized, Runtime};

/// Initial delay between load attempts.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Stderr kept from a failed syntax check.
const CHECK_DETAIL_LIMIT: usize = 2048;

/// A candidate materialized in its own scratch directory.
///
/// The directory is removed when the program is dropped, so repeated loads
/// never accumulate state.
#[derive(Debug)]
pub struct LoadedProgram {
    entry: String,
    files: Materialized,
    _scratch: TempDir,
}

impl LoadedProgram {
    /// Name of the function the worker invokes.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// The candidate source file.
    pub fn module(&self) -> &Path {
        &self.files.module
    }

    /// Scratch directory, also the worker's working directory.
    pub fn dir(&self) -> &Path {
        &self.files.dir
    }

    pub const fn files(&self) -> &Materialized {
        &self.files
    }
}

/// Loads candidates with bounded retries for transient failures.
#[derive(Debug)]
pub struct CodeLoader {
    runtime: Arc<dyn Runtime>,
    guard: Arc<ExecutionGuard>,
    scratch_root: PathBuf,
    forbidden: Vec<String>,
    max_attempts: u32,
    check_timeout: Duration,
}

impl CodeLoader {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        guard: Arc<ExecutionGuard>,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            guard,
            scratch_root: scratch_root.into(),
            forbidden: super::guard::DEFAULT_FORBIDDEN_IDENTIFIERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_attempts: 10,
            check_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_forbidden_identifiers(mut self, forbidden: Vec<String>) -> Self {
        self.forbidden = forbidden;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub const fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Reject source text that references a forbidden identifier.
    pub fn screen(&self, source: &str) -> Result<(), SandboxViolation> {
        match self.forbidden.iter().find(|id| source.contains(id.as_str())) {
            Some(identifier) => Err(SandboxViolation {
                identifier: identifier.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Load `source` so that `entry` can be invoked in a worker.
    ///
    /// Violations and blank sources are rejected before anything touches disk.
    #[instrument(skip(self, source), fields(runtime = self.runtime.name(), bytes = source.len()))]
    pub async fn load(&self, source: &str, entry: &str) -> Result<LoadedProgram, SandboxError> {
        if source.trim().is_empty() {
            return Err(LoadError::Empty {
                entry: entry.to_string(),
            }
            .into());
        }
        self.screen(source)?;

        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(|source| LoadError::Materialize {
                entry: entry.to_string(),
                source,
            })?;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(INITIAL_RETRY_DELAY)
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;
        let program = backoff::future::retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            async move {
                self.attempt(source, entry).await.map_err(|failure| match failure {
                    Failure::Transient(err) if attempt < self.max_attempts => {
                        debug!(attempt, error = %err, "transient load failure, retrying");
                        backoff::Error::transient(LoadError::Materialize {
                            entry: entry.to_string(),
                            source: err,
                        })
                    }
                    Failure::Transient(err) => {
                        warn!(attempt, error = %err, "load retries exhausted");
                        backoff::Error::permanent(LoadError::RetriesExhausted {
                            entry: entry.to_string(),
                            attempts: attempt,
                            detail: err.to_string(),
                        })
                    }
                    Failure::Permanent(err) => backoff::Error::permanent(err),
                })
            }
        })
        .await?;

        debug!(attempts, dir = %program.dir().display(), "candidate loaded");
        Ok(program)
    }

    async fn attempt(&self, source: &str, entry: &str) -> Result<LoadedProgram, Failure> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{entry}_"))
            .tempdir_in(&self.scratch_root)
            .map_err(|err| classify(entry, err))?;

        let files = self
            .runtime
            .materialize(scratch.path(), entry, source)
            .await
            .map_err(|err| classify(entry, err))?;

        // The module must be visible before a worker imports it.
        tokio::fs::metadata(&files.module)
            .await
            .map_err(|err| classify(entry, err))?;

        if let Some(cmd) = self.runtime.check_command(&files) {
            self.check(cmd, &files, entry).await?;
        }

        Ok(LoadedProgram {
            entry: entry.to_string(),
            files,
            _scratch: scratch,
        })
    }

    async fn check(
        &self,
        mut cmd: tokio::process::Command,
        files: &Materialized,
        entry: &str,
    ) -> Result<(), Failure> {
        self.guard.apply(&mut cmd, &files.dir);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|err| {
            if is_transient(&err) {
                Failure::Transient(err)
            } else {
                Failure::Permanent(LoadError::Materialize {
                    entry: entry.to_string(),
                    source: err,
                })
            }
        })?;

        let output = match tokio::time::timeout(self.check_timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(Failure::Transient)?,
            Err(_) => {
                return Err(Failure::Permanent(LoadError::Parse {
                    entry: entry.to_string(),
                    detail: format!("syntax check exceeded {:?}", self.check_timeout),
                }))
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Failure::Permanent(LoadError::Parse {
            entry: entry.to_string(),
            detail: tail(stderr.trim(), CHECK_DETAIL_LIMIT).to_string(),
        }))
    }
}

enum Failure {
    Transient(io::Error),
    Permanent(LoadError),
}

fn classify(entry: &str, err: io::Error) -> Failure {
    if is_transient(&err) || err.kind() == io::ErrorKind::NotFound {
        Failure::Transient(err)
    } else {
        Failure::Permanent(LoadError::Materialize {
            entry: entry.to_string(),
            source: err,
        })
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    ) || err
        .raw_os_error()
        .is_some_and(|code| code == Errno::ETXTBSY as i32 || code == Errno::EAGAIN as i32)
}

/// The last `limit` bytes of `text`, cut on a character boundary.
pub(crate) fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runtimes::InterpreterRuntime;
    use crate::services::sandbox::guard::ResourceLimits;

    fn loader(scratch: &Path) -> CodeLoader {
        let guard = ExecutionGuard::new(ResourceLimits::default(), vec![], &["PATH".to_string()]);
        CodeLoader::new(
            Arc::new(InterpreterRuntime::raw("sh", "sh")),
            Arc::new(guard),
            scratch,
        )
    }

    #[tokio::test]
    async fn test_blank_source_is_a_load_error() {
        let scratch = tempfile::tempdir().unwrap();
        let err = loader(scratch.path()).load("  \n\t", "algorithm").await.unwrap_err();
        assert!(matches!(err, SandboxError::Load(LoadError::Empty { .. })));
    }

    #[tokio::test]
    async fn test_forbidden_identifier_rejected_before_materializing() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path().join("never-created");
        let err = loader(&root)
            .load("from pebble import ProcessPool\n", "improve_algorithm")
            .await
            .unwrap_err();
        match err {
            SandboxError::Violation(v) => assert_eq!(v.identifier, "ProcessPool"),
            other => panic!("expected violation, got {other:?}"),
        }
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_loads_get_distinct_directories_removed_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let loader = loader(scratch.path());

        let first = loader.load("echo one\n", "algorithm").await.unwrap();
        let second = loader.load("echo two\n", "algorithm").await.unwrap();
        assert_ne!(first.dir(), second.dir());
        assert!(first.dir().file_name().unwrap().to_string_lossy().starts_with("algorithm_"));
        assert_eq!(std::fs::read_to_string(second.module()).unwrap(), "echo two\n");

        let dir = first.dir().to_path_buf();
        drop(first);
        assert!(!dir.exists());
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }
}
