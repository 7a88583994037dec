//! Utility evaluation with per-context usage budgets.
//!
//! A [`UtilityEvaluator`] is one evaluation context: it is built fresh for
//! every improvement attempt, so its usage counter starts at zero and never
//! crosses an attempt boundary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::errors::EvaluationError;
use crate::domain::models::EvaluatePolicy;
use crate::domain::ports::{Utility, UtilityScore};

/// Invocation counter that never exceeds its limit.
#[derive(Debug)]
pub struct UsageBudget {
    limit: u32,
    used: AtomicU32,
}

impl UsageBudget {
    pub const fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// Take one unit; `false` once the limit is reached.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used())
    }
}

/// Scores candidates with a utility, applying budget and failure policy.
pub struct UtilityEvaluator {
    utility: Arc<dyn Utility>,
    budget: UsageBudget,
    fail_value: f64,
}

impl UtilityEvaluator {
    pub fn new(utility: Arc<dyn Utility>, budget: u32) -> Self {
        Self {
            utility,
            budget: UsageBudget::new(budget),
            fail_value: 0.0,
        }
    }

    #[must_use]
    pub const fn with_fail_value(mut self, fail_value: f64) -> Self {
        self.fail_value = fail_value;
        self
    }

    pub fn utility(&self) -> &Arc<dyn Utility> {
        &self.utility
    }

    pub const fn budget(&self) -> &UsageBudget {
        &self.budget
    }

    /// Calls made in this context.
    pub fn usage(&self) -> u32 {
        self.budget.used()
    }

    /// Score `candidate`.
    ///
    /// - Over budget: 0 without running anything.
    /// - Failure with `handle_exceptions && log_usage`: the fail value.
    /// - Any other failure propagates.
    pub async fn evaluate(&self, candidate: &str, policy: EvaluatePolicy) -> Result<f64, EvaluationError> {
        self.evaluate_detailed(candidate, policy)
            .await
            .map(|score| score.value)
    }

    /// Like [`evaluate`](Self::evaluate) but keeps the held-out score.
    pub async fn evaluate_detailed(
        &self,
        candidate: &str,
        policy: EvaluatePolicy,
    ) -> Result<UtilityScore, EvaluationError> {
        if !self.budget.try_acquire() {
            warn!(
                utility = self.utility.name(),
                budget = self.budget.limit(),
                "utility budget exhausted, scoring 0"
            );
            return Ok(UtilityScore::value(0.0));
        }

        match self.utility.score(candidate, policy).await {
            Ok(score) => {
                debug!(utility = self.utility.name(), score = score.value, used = self.usage(), "scored candidate");
                Ok(score)
            }
            Err(err) if policy.absorbs_failures() => {
                warn!(utility = self.utility.name(), error = %err, "evaluation failed, using fail value");
                Ok(UtilityScore {
                    value: self.fail_value,
                    test: policy.log_usage.then_some(self.fail_value),
                })
            }
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for UtilityEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtilityEvaluator")
            .field("utility", &self.utility.name())
            .field("budget", &self.budget)
            .field("fail_value", &self.fail_value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{LoadError, SandboxError};
    use crate::domain::models::EvalMode;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Utility for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn description(&self) -> &str {
            "def utility(algorithm_str): ..."
        }

        async fn score(&self, _candidate: &str, _policy: EvaluatePolicy) -> Result<UtilityScore, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SandboxError::Load(LoadError::Empty { entry: "algorithm".into() }).into())
            } else {
                Ok(UtilityScore::value(0.5))
            }
        }
    }

    fn scripted(fail: bool) -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn test_budget_refusal_scores_zero_without_running() {
        let utility = scripted(false);
        let evaluator = UtilityEvaluator::new(utility.clone(), 2);
        for _ in 0..2 {
            assert!((evaluator.evaluate("x", EvaluatePolicy::strict()).await.unwrap() - 0.5).abs() < f64::EPSILON);
        }
        assert_eq!(evaluator.evaluate("x", EvaluatePolicy::strict()).await.unwrap(), 0.0);
        assert_eq!(utility.calls.load(Ordering::SeqCst), 2);
        assert_eq!(evaluator.usage(), 2);
    }

    #[tokio::test]
    async fn test_failure_policy_matrix() {
        let evaluator = UtilityEvaluator::new(scripted(true), 10);

        assert!(evaluator.evaluate("x", EvaluatePolicy::strict()).await.is_err());
        assert!(evaluator
            .evaluate("x", EvaluatePolicy::improver_call(EvalMode::Val))
            .await
            .is_err());
        assert_eq!(evaluator.evaluate("x", EvaluatePolicy::logged()).await.unwrap(), 0.0);

        let unhandled_logged = EvaluatePolicy {
            mode: EvalMode::Val,
            log_usage: true,
            handle_exceptions: false,
        };
        assert!(evaluator.evaluate("x", unhandled_logged).await.is_err());
    }

    #[tokio::test]
    async fn test_custom_fail_value() {
        let evaluator = UtilityEvaluator::new(scripted(true), 1).with_fail_value(-1.0);
        let score = evaluator
            .evaluate_detailed("x", EvaluatePolicy::logged())
            .await
            .unwrap();
        assert_eq!(score.value, -1.0);
        assert_eq!(score.test, Some(-1.0));
    }
}
