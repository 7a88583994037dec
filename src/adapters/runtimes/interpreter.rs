//! Interpreter-backed runtime.
//!
//! In `python` mode the candidate is written next to a bundled harness that
//! speaks the worker protocol, installs the capability proxies and imports the
//! candidate under a fresh module name. In `raw` mode the candidate is started
//! directly and must speak the protocol itself.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::models::{HarnessKind, RuntimeConfig};
use crate::domain::ports::{Materialized, Runtime};

const PYTHON_HARNESS: &str = include_str!("../../../assets/python/harness.py");
const HARNESS_FILE: &str = "_metaopt_harness.py";

const PYTHON_SYNTAX_CHECK: &str =
    "import ast, sys; ast.parse(open(sys.argv[1], encoding='utf-8').read(), sys.argv[1])";

/// Runtime that starts an interpreter program per worker.
#[derive(Debug, Clone)]
pub struct InterpreterRuntime {
    program: String,
    args: Vec<String>,
    extension: String,
    harness: HarnessKind,
}

impl InterpreterRuntime {
    /// Python with the bundled harness.
    pub fn python(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extension: "py".to_string(),
            harness: HarnessKind::Python,
        }
    }

    /// A program that runs protocol-speaking scripts with extension `extension`.
    pub fn raw(program: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extension: extension.into(),
            harness: HarnessKind::Raw,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            extension: config.extension.clone(),
            harness: config.harness,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub const fn harness(&self) -> HarnessKind {
        self.harness
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    fn module_path(&self, dir: &Path, entry: &str) -> PathBuf {
        dir.join(format!("{entry}.{}", self.extension))
    }
}

#[async_trait]
impl Runtime for InterpreterRuntime {
    fn name(&self) -> &str {
        match self.harness {
            HarnessKind::Python => "python",
            HarnessKind::Raw => &self.program,
        }
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    async fn materialize(
        &self,
        dir: &Path,
        entry: &str,
        source: &str,
    ) -> std::io::Result<Materialized> {
        let module = self.module_path(dir, entry);
        tokio::fs::write(&module, source).await?;

        let entrypoint = match self.harness {
            HarnessKind::Python => {
                let harness = dir.join(HARNESS_FILE);
                tokio::fs::write(&harness, PYTHON_HARNESS).await?;
                harness
            }
            HarnessKind::Raw => module.clone(),
        };

        Ok(Materialized {
            dir: dir.to_path_buf(),
            module,
            entrypoint,
        })
    }

    fn check_command(&self, program: &Materialized) -> Option<Command> {
        match self.harness {
            HarnessKind::Python => {
                let mut cmd = self.command();
                cmd.arg("-c").arg(PYTHON_SYNTAX_CHECK).arg(&program.module);
                Some(cmd)
            }
            HarnessKind::Raw => None,
        }
    }

    fn worker_command(&self, program: &Materialized) -> Command {
        let mut cmd = self.command();
        if self.harness == HarnessKind::Python {
            // no bytecode files, unbuffered protocol stream
            cmd.arg("-B").arg("-u");
        }
        cmd.arg(&program.entrypoint);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_python_materialize_writes_candidate_and_harness() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = InterpreterRuntime::python("python3");
        let files = runtime
            .materialize(dir.path(), "algorithm", "def algorithm():\n    return 1\n")
            .await
            .unwrap();

        assert_eq!(files.module, dir.path().join("algorithm.py"));
        assert_eq!(files.entrypoint, dir.path().join(HARNESS_FILE));
        let harness = std::fs::read_to_string(&files.entrypoint).unwrap();
        assert!(harness.contains("def main()"));
        assert!(runtime.check_command(&files).is_some());
    }

    #[tokio::test]
    async fn test_raw_materialize_runs_module_directly() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = InterpreterRuntime::raw("sh", "sh");
        let files = runtime
            .materialize(dir.path(), "utility", "read line\n")
            .await
            .unwrap();

        assert_eq!(files.module, files.entrypoint);
        assert!(files.module.ends_with("utility.sh"));
        assert!(runtime.check_command(&files).is_none());
        assert_eq!(runtime.name(), "sh");
    }
}
