//! Budgeted access to the generative service, with an optional shared cache.
//!
//! Every `prompt` or `batch_prompt` consumes one call from the model's budget
//! before the service is contacted, however many responses it asks for.
//! Requests fully answered from the cache consume nothing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::errors::GenerationError;
use crate::domain::models::GenerationRequest;
use crate::domain::ports::Generator;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    role: String,
    message: String,
    temperature_bits: u64,
}

impl CacheKey {
    fn new(role: &str, message: &str, temperature: f64) -> Self {
        Self {
            role: role.to_string(),
            message: message.to_string(),
            temperature_bits: temperature.to_bits(),
        }
    }
}

/// Memoized responses keyed by the exact (role, message, temperature) tuple.
#[derive(Debug, Default)]
pub struct GenerationCache {
    entries: RwLock<HashMap<CacheKey, Vec<String>>>,
    hits: AtomicU64,
}

static SHARED_CACHE: OnceLock<Arc<GenerationCache>> = OnceLock::new();

impl GenerationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED_CACHE.get_or_init(|| Arc::new(Self::new())))
    }

    /// The first `n` cached responses, if at least `n` are stored.
    pub async fn get(&self, role: &str, message: &str, temperature: f64, n: usize) -> Option<Vec<String>> {
        let entries = self.entries.read().await;
        let cached = entries.get(&CacheKey::new(role, message, temperature))?;
        if cached.len() < n {
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(cached[..n].to_vec())
    }

    /// Remember `responses`, keeping whichever list is longer.
    pub async fn store(&self, role: &str, message: &str, temperature: f64, responses: &[String]) {
        let mut entries = self.entries.write().await;
        let slot = entries
            .entry(CacheKey::new(role, message, temperature))
            .or_default();
        if responses.len() > slot.len() {
            *slot = responses.to_vec();
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Lookups answered from the cache so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct UsageEntry<'a> {
    timestamp: String,
    method: &'a str,
    n_requested: usize,
    n_returned: usize,
    temperature: f64,
    cached: bool,
    calls_used: u32,
}

/// Append-only JSON-lines record of generation calls.
#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn record(&self, entry: &UsageEntry<'_>) {
        let result = async {
            let mut line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
            line.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;
        if let Err(err) = result {
            warn!(path = %self.path.display(), error = %err, "failed to record generation usage");
        }
    }
}

/// A generative service handle with a fixed call budget.
pub struct LanguageModel {
    generator: Arc<dyn Generator>,
    cache: Option<Arc<GenerationCache>>,
    budget: u32,
    max_responses_per_call: u32,
    calls: AtomicU32,
    usage_log: Option<UsageLog>,
}

impl LanguageModel {
    pub fn new(generator: Arc<dyn Generator>, budget: u32, max_responses_per_call: u32) -> Self {
        Self {
            generator,
            cache: None,
            budget,
            max_responses_per_call: max_responses_per_call.max(1),
            calls: AtomicU32::new(0),
            usage_log: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<GenerationCache>>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_usage_log(mut self, log: Option<UsageLog>) -> Self {
        self.usage_log = log;
        self
    }

    pub const fn budget(&self) -> u32 {
        self.budget
    }

    pub const fn max_responses_per_call(&self) -> u32 {
        self.max_responses_per_call
    }

    /// Calls consumed so far.
    pub fn calls_used(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn consume(&self) -> Result<u32, GenerationError> {
        self.calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.budget).then_some(used + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| GenerationError::BudgetExhausted {
                budget: self.budget,
            })
    }

    /// `n_responses` completions of one message (clamped to `1..=max_responses_per_call`).
    pub async fn prompt(
        &self,
        role: &str,
        message: &str,
        n_responses: u32,
        temperature: f64,
    ) -> Result<Vec<String>, GenerationError> {
        let n = n_responses.clamp(1, self.max_responses_per_call);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(role, message, temperature, n as usize).await {
                self.log("prompt", n as usize, hit.len(), temperature, true).await;
                return Ok(hit);
            }
        }

        let used = self.consume()?;
        debug!(calls_used = used, budget = self.budget, n, "prompting generator");
        let mut responses = self
            .generator
            .generate(&GenerationRequest::new(role, message, n, temperature))
            .await?;
        responses.truncate(n as usize);

        if let Some(cache) = &self.cache {
            cache.store(role, message, temperature, &responses).await;
        }
        self.log("prompt", n as usize, responses.len(), temperature, false)
            .await;
        Ok(responses)
    }

    /// One completion per message, in order. Batches longer than
    /// `max_responses_per_call` are truncated. A message the service left
    /// unanswered gets an empty string in its position.
    pub async fn batch_prompt(
        &self,
        role: &str,
        messages: &[String],
        temperature: f64,
    ) -> Result<Vec<String>, GenerationError> {
        let limit = self.max_responses_per_call as usize;
        if messages.len() > limit {
            warn!(requested = messages.len(), limit, "truncating batch");
        }
        let messages = &messages[..messages.len().min(limit)];
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        // Identical messages are requested once with n set to their count.
        let mut distinct: Vec<(&str, usize)> = Vec::new();
        for message in messages {
            match distinct.iter_mut().find(|(m, _)| *m == message.as_str()) {
                Some((_, count)) => *count += 1,
                None => distinct.push((message.as_str(), 1)),
            }
        }

        let mut answers: HashMap<&str, Vec<String>> = HashMap::new();
        if let Some(cache) = &self.cache {
            for &(message, count) in &distinct {
                if let Some(hit) = cache.get(role, message, temperature, count).await {
                    answers.insert(message, hit);
                }
            }
        }
        let cached = answers.len() == distinct.len();

        if !cached {
            let used = self.consume()?;
            debug!(calls_used = used, budget = self.budget, batch = messages.len(), "batch prompting generator");

            let missing: Vec<(&str, usize)> = distinct
                .iter()
                .filter(|(m, _)| !answers.contains_key(m))
                .copied()
                .collect();
            let requests = missing.iter().map(|(message, count)| {
                let request =
                    GenerationRequest::new(role, *message, u32::try_from(*count).unwrap_or(u32::MAX), temperature);
                async move { self.generator.generate(&request).await }
            });
            let generated = futures::future::join_all(requests).await;

            for ((message, _), result) in missing.into_iter().zip(generated) {
                let responses = result?;
                if let Some(cache) = &self.cache {
                    cache.store(role, message, temperature, &responses).await;
                }
                answers.insert(message, responses);
            }
        }

        // Positions must line up with `messages`; a short reply leaves empty slots.
        let mut ordered = Vec::with_capacity(messages.len());
        let mut served: HashMap<&str, usize> = HashMap::new();
        let mut unanswered = 0usize;
        for message in messages {
            let idx = served.entry(message.as_str()).or_insert(0);
            match answers.get(message.as_str()).and_then(|r| r.get(*idx)) {
                Some(text) => ordered.push(text.clone()),
                None => {
                    unanswered += 1;
                    ordered.push(String::new());
                }
            }
            *idx += 1;
        }
        if unanswered > 0 {
            warn!(unanswered, batch = messages.len(), "generator returned fewer responses than requested");
        }

        self.log("batch_prompt", messages.len(), messages.len() - unanswered, temperature, cached)
            .await;
        Ok(ordered)
    }

    async fn log(&self, method: &str, n_requested: usize, n_returned: usize, temperature: f64, cached: bool) {
        if let Some(log) = &self.usage_log {
            log.record(&UsageEntry {
                timestamp: Utc::now().to_rfc3339(),
                method,
                n_requested,
                n_returned,
                temperature,
                cached,
                calls_used: self.calls_used(),
            })
            .await;
        }
    }
}

impl std::fmt::Debug for LanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageModel")
            .field("generator", &self.generator.name())
            .field("budget", &self.budget)
            .field("max_responses_per_call", &self.max_responses_per_call)
            .field("calls_used", &self.calls_used())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generators::{MockGenerator, MockResponse};

    #[tokio::test]
    async fn test_prompt_clamps_response_count() {
        let lm = LanguageModel::new(Arc::new(MockGenerator::with_texts(["x"])), 4, 3);
        let out = lm.prompt("r", "m", 10, 0.7).await.unwrap();
        assert_eq!(out.len(), 3);
        let out = lm.prompt("r", "m", 0, 0.7).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(lm.calls_used(), 2);
    }

    #[tokio::test]
    async fn test_failed_service_call_still_consumes_budget() {
        let generator = MockGenerator::scripted(vec![MockResponse::failure("down")]);
        let lm = LanguageModel::new(Arc::new(generator), 1, 6);
        assert!(matches!(
            lm.prompt("r", "m", 1, 0.7).await,
            Err(GenerationError::Service(_))
        ));
        assert!(matches!(
            lm.prompt("r", "m", 1, 0.7).await,
            Err(GenerationError::BudgetExhausted { budget: 1 })
        ));
    }

    #[tokio::test]
    async fn test_cached_prompt_does_not_consume_budget() {
        let cache = Arc::new(GenerationCache::new());
        let lm = LanguageModel::new(Arc::new(MockGenerator::with_texts(["a", "b"])), 1, 6)
            .with_cache(Some(Arc::clone(&cache)));

        let first = lm.prompt("r", "m", 2, 0.5).await.unwrap();
        let second = lm.prompt("r", "m", 2, 0.5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(lm.calls_used(), 1);
        assert_eq!(cache.hits(), 1);

        // different temperature is a different key
        assert!(lm.prompt("r", "m", 2, 0.6).await.is_err());

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_groups_duplicates() {
        let generator = Arc::new(MockGenerator::with_texts(["1", "2", "3"]));
        let lm = LanguageModel::new(generator.clone(), 4, 6);
        let messages = vec!["same".to_string(), "other".to_string(), "same".to_string()];
        let out = lm.batch_prompt("r", &messages, 0.7).await.unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(lm.calls_used(), 1);
        let requests = generator.requests();
        assert_eq!(requests.len(), 2);
        let same = requests.iter().find(|r| r.message == "same").unwrap();
        assert_eq!(same.n_responses, 2);
    }

    /// Answers every request with a fixed number of texts, whatever was asked.
    struct FixedCountGenerator(usize);

    #[async_trait::async_trait]
    impl Generator for FixedCountGenerator {
        fn name(&self) -> &'static str {
            "fixed_count"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
            Ok((0..self.0).map(|i| format!("{}#{i}", request.message)).collect())
        }
    }

    #[tokio::test]
    async fn test_prompt_truncates_oversized_replies() {
        let lm = LanguageModel::new(Arc::new(FixedCountGenerator(5)), 2, 6);
        let out = lm.prompt("r", "m", 2, 0.7).await.unwrap();
        assert_eq!(out, vec!["m#0", "m#1"]);
    }

    #[tokio::test]
    async fn test_short_batch_reply_keeps_positions() {
        let lm = LanguageModel::new(Arc::new(FixedCountGenerator(1)), 2, 6);
        let messages = vec!["same".to_string(), "other".to_string(), "same".to_string()];
        let out = lm.batch_prompt("r", &messages, 0.7).await.unwrap();

        assert_eq!(out, vec!["same#0".to_string(), "other#0".to_string(), String::new()]);
    }

    #[tokio::test]
    async fn test_usage_log_records_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage_log.jsonl");
        let lm = LanguageModel::new(Arc::new(MockGenerator::new()), 2, 6)
            .with_usage_log(Some(UsageLog::new(&path)));
        lm.prompt("r", "m", 2, 0.7).await.unwrap();
        lm.batch_prompt("r", &["a".to_string()], 0.2).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["method"], "prompt");
        assert_eq!(lines[0]["n_returned"], 2);
        assert_eq!(lines[1]["method"], "batch_prompt");
        assert_eq!(lines[1]["calls_used"], 2);
    }
}
