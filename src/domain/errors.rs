//! Domain errors for the metaopt optimizer.
//!
//! The taxonomy follows the failure modes of untrusted execution:
//! a candidate can fail to load ([`LoadError`]), reference something the
//! sandbox forbids ([`SandboxViolation`]), overrun its deadline
//! ([`SandboxError::Timeout`]), or exhaust a budget ([`GenerationError::BudgetExhausted`]).
//! The meta-optimizer folds all of them into [`AttemptError`], which always
//! leads to a revert rather than aborting the run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A candidate's source text could not be turned into an invocable program.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("candidate source for `{entry}` is empty")]
    Empty { entry: String },

    #[error("failed to materialize `{entry}`: {source}")]
    Materialize {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{entry}` failed to parse: {detail}")]
    Parse { entry: String, detail: String },

    #[error("`{entry}` failed to import: {detail}")]
    Import { entry: String, detail: String },

    #[error("load of `{entry}` still failing after {attempts} attempts: {detail}")]
    RetriesExhausted {
        entry: String,
        attempts: u32,
        detail: String,
    },
}

/// The candidate referenced an identifier that is not permitted inside the sandbox.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("candidate references `{identifier}`, which is not permitted inside the sandbox")]
pub struct SandboxViolation {
    pub identifier: String,
}

/// Failures of a single sandboxed invocation.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Violation(#[from] SandboxViolation),

    #[error("execution exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("candidate raised: {0}")]
    Raised(String),

    #[error("worker exited without a result (status {status:?}): {stderr}")]
    Crashed { status: Option<i32>, stderr: String },

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker pool was stopped before the job completed")]
    Stopped,
}

impl SandboxError {
    /// Whether the failure was caused by the deadline rather than the candidate.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Failures of the budgeted generation layer.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("language model call budget of {budget} exhausted")]
    BudgetExhausted { budget: u32 },

    #[error("generative service error: {0}")]
    Service(String),

    #[error("invalid generation request: {0}")]
    InvalidRequest(String),
}

/// A run identifier that cannot name a directory under the results root.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run id `{id}`: {reason}")]
pub struct InvalidRunId {
    pub id: String,
    pub reason: &'static str,
}

/// Failures while persisting or reading run artifacts.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run `{0}` does not exist")]
    MissingRun(String),

    #[error("malformed score log line {line}: {content}")]
    MalformedLog { line: usize, content: String },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of a utility function while scoring a candidate.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("utility returned an invalid score: {0}")]
    InvalidScore(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl EvaluationError {
    /// Whether the underlying failure was a deadline overrun.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Sandbox(SandboxError::Timeout(_)))
    }
}

/// Why an improvement attempt was reverted.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("improver failed to load: {0}")]
    Load(LoadError),

    #[error("sandbox violation: {0}")]
    Violation(SandboxViolation),

    #[error("improver exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("improver failed: {0}")]
    Improver(SandboxError),

    #[error("improved candidate rejected with score {score}")]
    Rejected { score: f64 },

    #[error("evaluation of improved candidate failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl From<SandboxError> for AttemptError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Load(e) => Self::Load(e),
            SandboxError::Violation(v) => Self::Violation(v),
            SandboxError::Timeout(d) => Self::Timeout(d),
            other => Self::Improver(other),
        }
    }
}

impl AttemptError {
    /// Short label used in logs and run summaries.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "load_error",
            Self::Violation(_) => "sandbox_violation",
            Self::Timeout(_) => "timeout",
            Self::Improver(_) => "improver_failed",
            Self::Rejected { .. } => "rejected",
            Self::Evaluation(_) => "evaluation_failed",
            Self::Checkpoint(_) => "checkpoint_failed",
        }
    }
}
