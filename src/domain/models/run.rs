use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::InvalidRunId;

/// Identifier of one optimization run, also the name of its results directory.
///
/// Format: `<unix-seconds>[_iterative][_seed][_improver]_<subtask>`. The leading
/// integer orders runs and doubles as the run's start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Build an identifier from its components.
    pub fn compose(
        started_at: i64,
        iterative: bool,
        use_seed_algorithm: bool,
        use_improver: bool,
        subtask: &str,
    ) -> Self {
        let mut id = started_at.to_string();
        if iterative {
            id.push_str("_iterative");
        }
        if use_seed_algorithm {
            id.push_str("_seed");
        }
        if use_improver {
            id.push_str("_improver");
        }
        id.push('_');
        id.push_str(subtask);
        Self(id)
    }

    /// Build an identifier stamped with the current time.
    pub fn now(iterative: bool, use_seed_algorithm: bool, use_improver: bool, subtask: &str) -> Self {
        Self::compose(
            chrono::Utc::now().timestamp(),
            iterative,
            use_seed_algorithm,
            use_improver,
            subtask,
        )
    }

    /// Unix seconds encoded in the leading integer, if any.
    pub fn started_at(&self) -> Option<i64> {
        let digits: String = self.0.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate user-supplied text as a single path component.
    pub fn parse(value: &str) -> Result<Self, InvalidRunId> {
        let invalid = |reason| InvalidRunId {
            id: value.to_string(),
            reason,
        };
        if value.is_empty() {
            return Err(invalid("empty"));
        }
        if value.starts_with('.') {
            return Err(invalid("must not start with '.'"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(invalid("only ASCII letters, digits, '_', '-' and '.' are allowed"));
        }
        Ok(Self(value.to_string()))
    }
}

impl FromStr for RunId {
    type Err = InvalidRunId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Phase of the improvement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Seeding,
    Attempting,
    Accepted,
    Reverted,
    Done,
}

/// Mutable state of a run, exclusively owned by the optimizer.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: RunId,
    /// Index of the next (or current) attempt
    pub iteration: u32,
    pub current_program: String,
    pub current_improver: String,
    /// Improver restored when an attempt is reverted
    pub previous_improver: String,
    /// Improved artifact indices found when resuming, ascending
    pub seed_iterations: Vec<u32>,
    pub phase: LoopPhase,
}

impl RunState {
    /// Fresh state in the seeding phase.
    pub fn new(run_id: RunId, program: String, improver: String) -> Self {
        Self {
            run_id,
            iteration: 0,
            current_program: program,
            previous_improver: improver.clone(),
            current_improver: improver,
            seed_iterations: Vec::new(),
            phase: LoopPhase::Seeding,
        }
    }

    /// Apply an accepted candidate.
    ///
    /// `used_improver` is the improver text the attempt ran with; it becomes the
    /// revert target. In iterative mode the candidate also becomes the improver.
    pub fn accept(&mut self, candidate: String, used_improver: String, iterative: bool) {
        self.previous_improver = used_improver;
        if iterative {
            self.current_improver.clone_from(&candidate);
        }
        self.current_program = candidate;
        self.phase = LoopPhase::Accepted;
    }

    /// Roll the improver back after a failed attempt; the candidate is untouched.
    pub fn revert(&mut self) {
        self.current_improver.clone_from(&self.previous_improver);
        self.phase = LoopPhase::Reverted;
    }
}

/// Outcome of one improvement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IterationOutcome {
    Accepted { score: f64 },
    Reverted { kind: String, reason: String },
}

/// Per-iteration entry of a run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    #[serde(flatten)]
    pub outcome: IterationOutcome,
    pub elapsed_ms: u64,
}

impl IterationRecord {
    /// Whether the attempt was accepted.
    pub const fn accepted(&self) -> bool {
        matches!(self.outcome, IterationOutcome::Accepted { .. })
    }
}

/// What a finished run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub start_iteration: u32,
    /// Score of the candidate the run started from, when it was evaluated
    pub baseline_score: Option<f64>,
    pub iterations: Vec<IterationRecord>,
    pub final_program: String,
    /// Improver the next attempt would run with
    pub final_improver: String,
}

impl RunSummary {
    /// Highest accepted score, if any attempt was accepted.
    pub fn best_score(&self) -> Option<f64> {
        self.iterations
            .iter()
            .filter_map(|r| match r.outcome {
                IterationOutcome::Accepted { score } => Some(score),
                IterationOutcome::Reverted { .. } => None,
            })
            .reduce(f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_composition() {
        let id = RunId::compose(1_700_000_000, true, true, true, "parity_noise");
        assert_eq!(id.as_str(), "1700000000_iterative_seed_improver_parity_noise");
        assert_eq!(id.started_at(), Some(1_700_000_000));

        let id = RunId::compose(42, false, false, false, "max_cut");
        assert_eq!(id.to_string(), "42_max_cut");
    }

    #[test]
    fn test_run_id_parse_rejects_path_traversal() {
        assert_eq!(
            RunId::parse("1700000000_iterative_parity_noise").unwrap().as_str(),
            "1700000000_iterative_parity_noise"
        );
        for bad in ["", "..", "../etc", "a/b", "a\\b", ".hidden", "run id"] {
            assert!(bad.parse::<RunId>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_run_id_without_timestamp() {
        assert_eq!(RunId::from("scratch").started_at(), None);
    }

    #[test]
    fn test_accept_non_iterative_keeps_improver() {
        let mut state = RunState::new(RunId::from("1_x"), "p0".into(), "imp".into());
        state.accept("p1".into(), "imp".into(), false);
        assert_eq!(state.current_program, "p1");
        assert_eq!(state.current_improver, "imp");
        assert_eq!(state.previous_improver, "imp");
    }

    #[test]
    fn test_accept_iterative_promotes_candidate_then_revert_restores() {
        let mut state = RunState::new(RunId::from("1_x"), "p0".into(), "imp0".into());
        state.accept("p1".into(), "imp0".into(), true);
        assert_eq!(state.current_improver, "p1");
        assert_eq!(state.previous_improver, "imp0");

        state.revert();
        assert_eq!(state.current_improver, "imp0");
        assert_eq!(state.current_program, "p1");
        assert_eq!(state.phase, LoopPhase::Reverted);
    }
}
