//! Host side of the capabilities handed to an improver.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::evaluator::UtilityEvaluator;
use super::language_model::LanguageModel;
use crate::domain::errors::GenerationError;
use crate::domain::models::{EvalMode, EvaluatePolicy};
use crate::domain::ports::HostCapabilities;
use crate::services::sandbox::protocol::{language_model_capability, utility_capability};

const fn default_temperature() -> f64 {
    0.7
}

const fn default_n_responses() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ScoreParams {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    mode: EvalMode,
}

#[derive(Debug, Deserialize)]
struct PromptParams {
    #[serde(default)]
    role: String,
    message: String,
    #[serde(default = "default_n_responses")]
    n_responses: u32,
    #[serde(default = "default_temperature")]
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct BatchPromptParams {
    #[serde(default)]
    role: String,
    messages: Vec<String>,
    #[serde(default = "default_temperature")]
    temperature: f64,
}

/// Capabilities of one improvement attempt: a fresh evaluation context and a
/// fresh language model. Budgets are enforced here on every call.
#[derive(Debug, Default, Clone)]
pub struct AttemptCapabilities {
    utility: Option<Arc<UtilityEvaluator>>,
    language_model: Option<Arc<LanguageModel>>,
}

impl AttemptCapabilities {
    pub fn new(utility: Arc<UtilityEvaluator>, language_model: Arc<LanguageModel>) -> Self {
        Self {
            utility: Some(utility),
            language_model: Some(language_model),
        }
    }

    /// Descriptor arguments `(utility, language_model)` announcing the budgets to the worker.
    pub fn descriptors(&self) -> Vec<Value> {
        let mut args = Vec::with_capacity(2);
        if let Some(utility) = &self.utility {
            args.push(utility_capability(
                utility.budget().limit(),
                utility.utility().description(),
            ));
        }
        if let Some(lm) = &self.language_model {
            args.push(language_model_capability(lm.budget(), lm.max_responses_per_call()));
        }
        args
    }

    async fn utility_call(&self, method: &str, params: Value) -> Result<Value, String> {
        let evaluator = self
            .utility
            .as_ref()
            .ok_or_else(|| "utility capability not granted".to_string())?;
        match method {
            "score" => {
                let params: ScoreParams =
                    serde_json::from_value(params).map_err(|e| format!("bad score params: {e}"))?;
                let text = params.text.unwrap_or_default();
                evaluator
                    .evaluate(&text, EvaluatePolicy::improver_call(params.mode))
                    .await
                    .map(|score| json!(score))
                    .map_err(|e| e.to_string())
            }
            "usage" => Ok(json!(evaluator.usage())),
            other => Err(format!("unknown utility method `{other}`")),
        }
    }

    async fn language_model_call(&self, method: &str, params: Value) -> Result<Value, String> {
        let lm = self
            .language_model
            .as_ref()
            .ok_or_else(|| "language_model capability not granted".to_string())?;
        let result = match method {
            "prompt" => {
                let p: PromptParams =
                    serde_json::from_value(params).map_err(|e| format!("bad prompt params: {e}"))?;
                lm.prompt(&p.role, &p.message, p.n_responses, p.temperature).await
            }
            "batch_prompt" => {
                let p: BatchPromptParams = serde_json::from_value(params)
                    .map_err(|e| format!("bad batch_prompt params: {e}"))?;
                lm.batch_prompt(&p.role, &p.messages, p.temperature).await
            }
            other => return Err(format!("unknown language_model method `{other}`")),
        };

        match result {
            Ok(texts) => Ok(json!(texts)),
            Err(GenerationError::BudgetExhausted { budget }) => {
                warn!(budget, "language model budget exhausted, returning no responses");
                Ok(json!([]))
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

#[async_trait]
impl HostCapabilities for AttemptCapabilities {
    async fn call(&self, target: &str, method: &str, params: Value) -> Result<Value, String> {
        match target {
            "utility" => self.utility_call(method, params).await,
            "language_model" => self.language_model_call(method, params).await,
            other => Err(format!("unknown capability `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generators::MockGenerator;
    use crate::domain::errors::EvaluationError;
    use crate::domain::ports::{Utility, UtilityScore};

    struct Length;

    #[async_trait]
    impl Utility for Length {
        fn name(&self) -> &str {
            "length"
        }

        fn description(&self) -> &str {
            "len(algorithm_str)"
        }

        async fn score(&self, candidate: &str, _policy: EvaluatePolicy) -> Result<UtilityScore, EvaluationError> {
            #[allow(clippy::cast_precision_loss)]
            Ok(UtilityScore::value(candidate.len() as f64))
        }
    }

    fn capabilities(utility_budget: u32, lm_budget: u32) -> AttemptCapabilities {
        AttemptCapabilities::new(
            Arc::new(UtilityEvaluator::new(Arc::new(Length), utility_budget)),
            Arc::new(LanguageModel::new(Arc::new(MockGenerator::with_texts(["r"])), lm_budget, 6)),
        )
    }

    #[tokio::test]
    async fn test_score_and_usage_calls() {
        let caps = capabilities(2, 1);
        let score = caps.call("utility", "score", json!({"text": "abcd"})).await.unwrap();
        assert_eq!(score, json!(4.0));
        assert_eq!(caps.call("utility", "usage", json!({})).await.unwrap(), json!(1));

        // null text from a failed extraction scores like an empty candidate
        let score = caps.call("utility", "score", json!({"text": null})).await.unwrap();
        assert_eq!(score, json!(0.0));
        let over = caps.call("utility", "score", json!({"text": "abcd"})).await.unwrap();
        assert_eq!(over, json!(0.0));
    }

    #[tokio::test]
    async fn test_exhausted_language_model_returns_empty_list() {
        let caps = capabilities(1, 1);
        let first = caps
            .call("language_model", "batch_prompt", json!({"role": "r", "messages": ["a", "b"]}))
            .await
            .unwrap();
        assert_eq!(first, json!(["r", "r"]));
        let second = caps
            .call("language_model", "prompt", json!({"role": "r", "message": "a"}))
            .await
            .unwrap();
        assert_eq!(second, json!([]));
    }

    #[tokio::test]
    async fn test_descriptors_carry_budgets() {
        let caps = capabilities(7, 3);
        let descriptors = caps.descriptors();
        assert_eq!(descriptors[0]["budget"], 7);
        assert_eq!(descriptors[0]["description"], "len(algorithm_str)");
        assert_eq!(descriptors[1]["budget"], 3);
        assert_eq!(descriptors[1]["max_responses_per_call"], 6);
        assert!(caps.call("shell", "run", json!({})).await.is_err());
    }
}
