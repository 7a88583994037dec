//! Common test utilities for integration tests
//!
//! Candidates in these tests are POSIX shell scripts run in raw mode: each
//! script reads the `invoke` line from stdin and prints protocol messages
//! itself, so the suite does not depend on a Python interpreter.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metaopt::adapters::runtimes::InterpreterRuntime;
use metaopt::domain::models::{Config, HarnessKind, SandboxConfig};
use metaopt::services::SandboxExecutor;
use tempfile::TempDir;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Executor running `sh` scripts under the default guard.
pub fn sh_executor(scratch: &Path) -> SandboxExecutor {
    SandboxExecutor::new(
        Arc::new(InterpreterRuntime::raw("sh", "sh")),
        &SandboxConfig::default(),
        scratch.to_path_buf(),
    )
}

/// Configuration for a raw `sh` runtime rooted in `root`.
pub fn sh_config(root: &Path, task: &str) -> Config {
    let mut config = Config::default();
    config.task = task.to_string();
    config.subtask = task.to_string();
    config.runtime.program = "sh".to_string();
    config.runtime.extension = "sh".to_string();
    config.runtime.harness = HarnessKind::Raw;
    config.paths.results_dir = path_string(&root.join("results"));
    config.paths.tasks_dir = path_string(&root.join("tasks"));
    config.paths.scratch_dir = path_string(&root.join("temp"));
    config
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Write `content` to `tasks/<task>/<stem>.sh` under `root`.
pub fn write_task_file(root: &Path, task: &str, stem: &str, content: &str) -> PathBuf {
    let dir = root.join("tasks").join(task);
    std::fs::create_dir_all(&dir).expect("Failed to create task dir");
    let path = dir.join(format!("{stem}.sh"));
    std::fs::write(&path, content).expect("Failed to write task file");
    path
}

/// Scoring program: candidates are `score=<number>` and score that number.
/// Anything else scores 0.
pub const SCORE_ECHO_UTILITY: &str = r#"read -r line
score=$(printf '%s\n' "$line" | sed -n 's/.*"args":\["score=\([0-9.]*\)".*/\1/p')
[ -n "$score" ] || score=0
printf '{"type":"result","value":%s}\n' "$score"
"#;

/// Improver that asks the utility to score each of `variants` (as
/// `score=<v>`) and returns the best one.
pub fn picking_improver(variants: &[&str]) -> String {
    format!(
        r#"read -r invoke
best=""
best_score=-1
id=0
for v in {variants}; do
  id=$((id+1))
  printf '{{"type":"call","id":%d,"target":"utility","method":"score","params":{{"text":"score=%s","mode":"val"}}}}\n' "$id" "$v"
  read -r reply
  s=$(printf '%s\n' "$reply" | sed -n 's/.*"ok":\([-0-9.eE+]*\).*/\1/p')
  [ -n "$s" ] || s=0
  if awk -v a="$s" -v b="$best_score" 'BEGIN {{ exit !(a > b) }}'; then
    best_score=$s
    best=$v
  fi
done
printf '{{"type":"result","value":"score=%s"}}\n' "$best"
"#,
        variants = variants.join(" ")
    )
}

/// Improver that returns `candidate` without looking at anything.
pub fn constant_improver(candidate: &str) -> String {
    format!(
        "read -r invoke\nprintf '{{\"type\":\"result\",\"value\":\"%s\"}}\\n' '{candidate}'\n"
    )
}

/// Whether a `python3` interpreter is on `PATH`.
pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Executor running candidates through the bundled Python harness.
pub fn python_executor(scratch: &Path) -> SandboxExecutor {
    SandboxExecutor::new(
        Arc::new(InterpreterRuntime::python("python3")),
        &SandboxConfig::default(),
        scratch.to_path_buf(),
    )
}

/// Default (Python) configuration with the shipped tasks copied under `root`.
pub fn python_config(root: &Path, task: &str) -> Config {
    let tasks = root.join("tasks");
    copy_dir(&Path::new(env!("CARGO_MANIFEST_DIR")).join("tasks"), &tasks);
    let mut config = Config::default();
    config.task = task.to_string();
    config.subtask = task.to_string();
    config.paths.results_dir = path_string(&root.join("results"));
    config.paths.tasks_dir = path_string(&tasks);
    config.paths.scratch_dir = path_string(&root.join("temp"));
    config
}

fn copy_dir(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).expect("Failed to create directory");
    for entry in std::fs::read_dir(from).expect("Failed to read directory") {
        let entry = entry.expect("Failed to read entry");
        let target = to.join(entry.file_name());
        if entry.file_type().expect("Failed to stat entry").is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).expect("Failed to copy file");
        }
    }
}
