//! Runtime port - the interpreter adapter candidates run under.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

/// Files a runtime wrote for one loaded candidate.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Scratch directory holding every file below
    pub dir: PathBuf,
    /// The candidate source file
    pub module: PathBuf,
    /// The file the interpreter is started with
    pub entrypoint: PathBuf,
}

/// Compiler/interpreter adapter.
#[async_trait]
pub trait Runtime: Send + Sync + std::fmt::Debug {
    /// Runtime name for logs.
    fn name(&self) -> &str;

    /// Source file extension without the leading dot.
    fn extension(&self) -> &str;

    /// Write `source` (and any support files) into `dir`.
    async fn materialize(
        &self,
        dir: &Path,
        entry: &str,
        source: &str,
    ) -> std::io::Result<Materialized>;

    /// Command that exits non-zero when the candidate does not parse.
    fn check_command(&self, program: &Materialized) -> Option<Command>;

    /// Command that starts a worker speaking the line protocol.
    fn worker_command(&self, program: &Materialized) -> Command;
}
