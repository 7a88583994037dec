//! Mock generator for testing and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::GenerationError;
use crate::domain::models::GenerationRequest;
use crate::domain::ports::Generator;

/// Mock response configuration.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Output text
    pub output: String,
    /// Whether to simulate failure
    pub fail: bool,
    /// Error message if failing
    pub error_message: Option<String>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            output: "Mock response.".to_string(),
            fail: false,
            error_message: None,
        }
    }
}

impl MockResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Generator that serves scripted responses round-robin, one per requested response.
#[derive(Debug, Default)]
pub struct MockGenerator {
    script: Vec<MockResponse>,
    cursor: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    latency: Option<Duration>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `script` in order, wrapping around at the end.
    pub fn scripted(script: Vec<MockResponse>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Serve each text as a successful response, in order.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted(texts.into_iter().map(MockResponse::success).collect())
    }

    /// Sleep before answering each request.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_response(&self) -> MockResponse {
        if self.script.is_empty() {
            return MockResponse::default();
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.script.len();
        self.script[idx].clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        (0..request.n_responses)
            .map(|_| {
                let response = self.next_response();
                if response.fail {
                    Err(GenerationError::Service(
                        response
                            .error_message
                            .unwrap_or_else(|| "mock failure".to_string()),
                    ))
                } else {
                    Ok(response.output)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_cycle() {
        let generator = MockGenerator::with_texts(["a", "b", "c"]);
        let request = GenerationRequest::new("role", "msg", 4, 0.7);
        let out = generator.generate(&request).await.unwrap();
        assert_eq!(out, vec!["a", "b", "c", "a"]);
        assert_eq!(generator.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_surfaces_as_service_error() {
        let generator = MockGenerator::scripted(vec![MockResponse::failure("overloaded")]);
        let request = GenerationRequest::new("role", "msg", 1, 0.0);
        let err = generator.generate(&request).await.unwrap_err();
        assert!(matches!(err, GenerationError::Service(msg) if msg == "overloaded"));
    }
}
