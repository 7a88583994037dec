//! Candidate program vocabulary shared by evaluators and the checkpoint store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which instance set a scoring program evaluates against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// Validation instances, visible to improvers through the utility capability
    #[default]
    Val,
    /// Held-out instances, only scored for the log
    Test,
}

impl EvalMode {
    /// Wire name passed verbatim to scoring programs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "val" => Ok(Self::Val),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown evaluation mode `{other}` (expected val or test)")),
        }
    }
}

/// Role of a persisted artifact within an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    /// The candidate an attempt started from
    Seed,
    /// The candidate an accepted attempt produced
    Improved,
}

impl ArtifactRole {
    /// File stem prefix for this role.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Seed => "seed_algorithm",
            Self::Improved => "improved_algorithm",
        }
    }
}

/// Caller policy for one utility evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatePolicy {
    /// Instance set to score against
    pub mode: EvalMode,
    /// Score val and test and append them to the score log
    pub log_usage: bool,
    /// Convert failures into the fail value (only together with `log_usage`)
    pub handle_exceptions: bool,
}

impl EvaluatePolicy {
    /// Policy used for capability calls made by improvers.
    pub const fn improver_call(mode: EvalMode) -> Self {
        Self {
            mode,
            log_usage: false,
            handle_exceptions: true,
        }
    }

    /// Policy used by the optimizer when it scores a candidate for the record.
    pub const fn logged() -> Self {
        Self {
            mode: EvalMode::Val,
            log_usage: true,
            handle_exceptions: true,
        }
    }

    /// Policy used to validate resumed artifacts: every failure propagates.
    pub const fn strict() -> Self {
        Self {
            mode: EvalMode::Val,
            log_usage: false,
            handle_exceptions: false,
        }
    }

    /// Whether failures are converted into the fail value.
    pub const fn absorbs_failures(self) -> bool {
        self.handle_exceptions && self.log_usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_mode_parsing() {
        assert_eq!("val".parse::<EvalMode>().unwrap(), EvalMode::Val);
        assert_eq!("test".parse::<EvalMode>().unwrap(), EvalMode::Test);
        assert!("train".parse::<EvalMode>().is_err());
        assert_eq!(EvalMode::Test.to_string(), "test");
    }

    #[test]
    fn test_only_logged_handled_policy_absorbs_failures() {
        assert!(EvaluatePolicy::logged().absorbs_failures());
        assert!(!EvaluatePolicy::improver_call(EvalMode::Val).absorbs_failures());
        assert!(!EvaluatePolicy::strict().absorbs_failures());
    }
}
