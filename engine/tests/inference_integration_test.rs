//! Integration tests for the llama.cpp server provider
//!
//! These tests do NOT require a running llama.cpp server: wiremock stands
//! in for it, so the provider's request shape and error mapping can be
//! verified hermetically.

use sentinel_engine::inference::llama_server::SamplingParams;
use sentinel_engine::inference::{
    CompletionRequest, InferenceError, InferenceProvider, LlamaServerProvider,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer) -> LlamaServerProvider {
    LlamaServerProvider::new(server.uri(), SamplingParams::default())
}

#[tokio::test]
async fn test_completion_returns_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "{\"action\":\"back\"}",
            "stop": true,
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let completion = provider
        .complete(&CompletionRequest::new("<|user|>\ngo back\n"))
        .await
        .unwrap();

    assert_eq!(completion, "{\"action\":\"back\"}");
}

#[tokio::test]
async fn test_sampling_params_and_grammar_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(serde_json::json!({
            "grammar": "root ::= object",
            "temperature": 0.3,
            "top_p": 0.9,
            "n_predict": 256,
            "stream": false,
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"content": "{}"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let request = CompletionRequest::new("classify").with_grammar("root ::= object");

    provider.complete(&request).await.unwrap();
}

#[tokio::test]
async fn test_server_error_status_is_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let result = provider.complete(&CompletionRequest::new("p")).await;

    assert!(matches!(result, Err(InferenceError::RequestFailed(503))));
}

#[tokio::test]
async fn test_malformed_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let result = provider.complete(&CompletionRequest::new("p")).await;

    assert!(matches!(result, Err(InferenceError::ParseError(_))));
}

#[tokio::test]
async fn test_connection_failure_is_mapped() {
    // Nothing listens on this port
    let provider = LlamaServerProvider::new("http://127.0.0.1:9", SamplingParams::default());
    let result = provider.complete(&CompletionRequest::new("p")).await;

    match result.unwrap_err() {
        InferenceError::ServerUnavailable(msg) => {
            assert!(msg.contains("Cannot connect"));
        }
        // Network errors can manifest differently per platform
        InferenceError::NetworkError(_) => {}
        other => panic!("expected ServerUnavailable or NetworkError, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .mount(&server)
        .await;

    assert!(provider_for(&server).check_health().await);

    let dead = LlamaServerProvider::new("http://127.0.0.1:9", SamplingParams::default());
    assert!(!dead.check_health().await);
}
