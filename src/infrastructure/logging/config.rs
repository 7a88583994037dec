use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Target under which worker stderr is forwarded.
pub const CANDIDATE_TARGET: &str = "candidate";

/// Logging configuration (`logging:` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LogConfig {
    /// Level for the optimizer's own events (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,

    /// Level for stderr forwarded from candidate workers; lines are emitted at
    /// `debug`, so anything coarser hides them
    #[serde(default = "default_candidate_level")]
    pub candidate_level: String,

    /// Format of the stderr stream
    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// Log to stderr; stdout carries command output only
    #[serde(default = "default_true")]
    pub stderr: bool,

    /// Directory for JSON log files, none disables file output
    #[serde(default)]
    pub file_dir: Option<PathBuf>,

    /// File name (prefix when rotating) inside `file_dir`
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Rotation of the log file
    #[serde(default)]
    pub file_rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    #[default]
    Never,
}

impl LogConfig {
    /// Filter directives used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        format!("{},{CANDIDATE_TARGET}={}", self.level, self.candidate_level)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            candidate_level: default_candidate_level(),
            format: default_format(),
            stderr: true,
            file_dir: None,
            file_name: default_file_name(),
            file_rotation: RotationPolicy::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_candidate_level() -> String {
    "info".to_string()
}

const fn default_format() -> LogFormat {
    LogFormat::Pretty
}

const fn default_true() -> bool {
    true
}

fn default_file_name() -> String {
    "metaopt.log".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_scope_candidate_output() {
        let config = LogConfig {
            candidate_level: "debug".to_string(),
            ..LogConfig::default()
        };
        assert_eq!(config.directives(), "info,candidate=debug");
    }
}
