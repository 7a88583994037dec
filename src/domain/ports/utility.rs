//! Utility port - scoring functions over candidate text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::EvaluationError;
use crate::domain::models::EvaluatePolicy;

/// Result of scoring one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilityScore {
    /// Score in the requested mode
    pub value: f64,
    /// Held-out score, present when the policy asked for logging
    pub test: Option<f64>,
}

impl UtilityScore {
    /// A score with no held-out component.
    pub const fn value(value: f64) -> Self {
        Self { value, test: None }
    }
}

/// A pluggable scoring function.
///
/// Implementations report failures as errors; the utility evaluator decides
/// whether a failure becomes the fail value or propagates.
#[async_trait]
pub trait Utility: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Public description of the scoring contract, embedded verbatim in prompts.
    fn description(&self) -> &str;

    /// Score `candidate` under `policy`.
    async fn score(
        &self,
        candidate: &str,
        policy: EvaluatePolicy,
    ) -> Result<UtilityScore, EvaluationError>;
}
