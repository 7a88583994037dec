//! Integration tests for the Anthropic generator against a mock HTTP server.

use metaopt::adapters::generators::{AnthropicApiConfig, AnthropicGenerator};
use metaopt::domain::errors::GenerationError;
use metaopt::domain::models::GenerationRequest;
use metaopt::domain::ports::Generator;
use mockito::{Matcher, Server};
use serde_json::json;

fn response_body(text: &str) -> String {
    json!({
        "id": "msg_01ABC123",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "model": "claude-sonnet-4-5",
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 10, "output_tokens": 3}
    })
    .to_string()
}

fn config_for(server: &Server) -> AnthropicApiConfig {
    AnthropicApiConfig::default()
        .with_api_key("test-api-key")
        .with_base_url(server.url())
}

#[tokio::test]
async fn test_one_http_call_per_requested_response() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-api-key")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJson(json!({
            "system": "You are an expert programmer.",
            "temperature": 0.4,
            "messages": [{"role": "user", "content": "improve this"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(response_body("```python\ndef algorithm(): pass\n```"))
        .expect(3)
        .create_async()
        .await;

    let generator = AnthropicGenerator::new(config_for(&server)).unwrap();
    let request = GenerationRequest::new("You are an expert programmer.", "improve this", 3, 0.4);
    let responses = generator.generate(&request).await.unwrap();

    assert_eq!(responses.len(), 3);
    assert!(responses.iter().all(|r| r.contains("def algorithm")));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(401)
        .with_body(r#"{"type":"error","error":{"type":"authentication_error"}}"#)
        .expect(1)
        .create_async()
        .await;

    let generator = AnthropicGenerator::new(config_for(&server)).unwrap();
    let err = generator
        .generate(&GenerationRequest::new("r", "m", 1, 0.7))
        .await
        .unwrap_err();

    match err {
        GenerationError::Service(message) => assert!(message.contains("401")),
        other => panic!("expected service error, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried_up_to_the_limit() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(529)
        .with_body(r#"{"type":"error","error":{"type":"overloaded_error"}}"#)
        .expect(2)
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.max_retries = 2;
    let generator = AnthropicGenerator::new(config).unwrap();
    let err = generator
        .generate(&GenerationRequest::new("r", "m", 1, 0.7))
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Service(_)));
    mock.assert_async().await;
}

#[test]
fn test_missing_api_key_is_an_invalid_request() {
    temp_env::with_var_unset("ANTHROPIC_API_KEY", || {
        let generator = AnthropicGenerator::new(AnthropicApiConfig::default()).unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let err = runtime
            .block_on(generator.generate(&GenerationRequest::new("r", "m", 1, 0.7)))
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
    });
}

#[tokio::test]
async fn test_temperature_above_provider_limit_is_rejected_before_sending() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body(response_body("unused"))
        .expect(0)
        .create_async()
        .await;

    let generator = AnthropicGenerator::new(config_for(&server)).unwrap();
    let err = generator
        .generate(&GenerationRequest::new("r", "m", 2, 1.4))
        .await
        .unwrap_err();

    match err {
        GenerationError::InvalidRequest(message) => assert!(message.contains("1.4")),
        other => panic!("expected invalid request, got {other:?}"),
    }
    mock.assert_async().await;
}
