//! Anthropic Messages API generator.
//!
//! The Messages API returns one completion per request, so a request for
//! `n` responses issues `n` concurrent HTTP calls, all passing through a
//! client-side rate limiter. Rate limiting (429), overload and server errors
//! are retried with exponential backoff.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::domain::errors::GenerationError;
use crate::domain::models::{GenerationRequest, GeneratorConfig, GeneratorProvider};
use crate::domain::ports::Generator;

/// Configuration for the Anthropic API generator.
#[derive(Debug, Clone)]
pub struct AnthropicApiConfig {
    /// API key (will be read from ANTHROPIC_API_KEY env if not set).
    pub api_key: Option<String>,
    /// API base URL.
    pub base_url: String,
    /// Model to use.
    pub model: String,
    /// API version header.
    pub api_version: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Max tokens to generate.
    pub max_tokens: u32,
    /// Requests per second allowed by the client-side limiter.
    pub requests_per_second: u32,
    /// Attempts per completion before giving up on transient failures.
    pub max_retries: u32,
}

impl Default for AnthropicApiConfig {
    fn default() -> Self {
        Self::from(&GeneratorConfig::default())
    }
}

impl From<&GeneratorConfig> for AnthropicApiConfig {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_version: "2023-06-01".to_string(),
            timeout_secs: config.timeout_secs,
            max_tokens: config.max_tokens,
            requests_per_second: config.requests_per_second,
            max_retries: config.max_retries,
        }
    }
}

impl AnthropicApiConfig {
    /// Get API key from config or environment.
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }

    /// Create config with explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Create config with a custom base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Message role in Anthropic API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Request to the Anthropic Messages API.
#[derive(Debug, Serialize)]
pub struct MessagesRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<&'a str>,
    pub messages: Vec<Message>,
    pub temperature: f64,
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl MessagesResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Generator backed by the Anthropic Messages API.
pub struct AnthropicGenerator {
    config: AnthropicApiConfig,
    client: Client,
    limiter: DefaultDirectRateLimiter,
}

impl AnthropicGenerator {
    /// Create a new Anthropic API generator.
    pub fn new(config: AnthropicApiConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Service(format!("Failed to create HTTP client: {e}")))?;
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            config,
            client,
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    async fn complete_once(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<String, backoff::Error<GenerationError>> {
        self.limiter.until_ready().await;

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: (!request.role.is_empty()).then_some(request.role.as_str()),
            messages: vec![Message {
                role: MessageRole::User,
                content: request.message.clone(),
            }],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = GenerationError::Service(format!("API request failed: {e}"));
                if e.is_timeout() || e.is_connect() {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = GenerationError::Service(format!("API error {status}: {body}"));
            return Err(if is_retryable(status) {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(GenerationError::Service(format!(
                "Failed to parse response: {e}"
            )))
        })?;
        debug!(stop_reason = ?parsed.stop_reason, "completion received");
        Ok(parsed.text())
    }

    async fn complete(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(20))
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0u32;
        backoff::future::retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            async move {
                match self.complete_once(api_key, request).await {
                    Err(backoff::Error::Transient { err, .. }) if attempt >= max_attempts => {
                        warn!(attempt, error = %err, "giving up on completion");
                        Err(backoff::Error::permanent(err))
                    }
                    other => other,
                }
            }
        })
        .await
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || status.as_u16() == 529
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn name(&self) -> &'static str {
        "anthropic_api"
    }

    #[instrument(skip_all, fields(model = %self.config.model, n = request.n_responses))]
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
        let api_key = self
            .config
            .get_api_key()
            .ok_or_else(|| GenerationError::InvalidRequest("ANTHROPIC_API_KEY not set".into()))?;
        let max_temperature = GeneratorProvider::AnthropicApi.max_temperature();
        if !(0.0..=max_temperature).contains(&request.temperature) {
            return Err(GenerationError::InvalidRequest(format!(
                "temperature {} is outside 0.0..={max_temperature}",
                request.temperature
            )));
        }

        let completions = (0..request.n_responses).map(|_| self.complete(&api_key, request));
        futures::future::try_join_all(completions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_omits_empty_system() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: None,
            messages: vec![Message {
                role: MessageRole::User,
                content: "hi".into(),
            }],
            temperature: 0.7,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("system").is_none());
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_text_skips_non_text_blocks() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"answer"}],"stop_reason":"end_turn"}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "answer");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::from_u16(529).unwrap()));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }
}
