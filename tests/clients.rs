//! HTTP client tests against local `wiremock` servers.
//!
//! No real credentials or network access are needed: each test points a
//! client at a mock server and checks the request it sends and how it maps
//! the response.

use futures::StreamExt;
use ocrbatch::config::ImageMode;
use ocrbatch::pipeline::chat::build_messages;
use ocrbatch::{
    chat_batch, BatchConfig, BatchInvoker, ChatClient, ChatConfig, ChatPrompt, InvokeError,
    OcrClient, OcrConfig, Request,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, header_exists, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn chat_client(server: &MockServer) -> ChatClient {
    let mut config = ChatConfig::new("test-key");
    config.base_url = format!("{}/api/v3/", server.uri());
    config.model = "test-model".into();
    ChatClient::new(config).unwrap()
}

fn ocr_client(server: &MockServer) -> OcrClient {
    let mut config = OcrConfig::new("AKTEST", "SKTEST");
    config.host = server.uri();
    OcrClient::new(config).unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 3}
    })
}

// ── Chat ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_complete_sends_model_effort_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "reasoning_effort": "medium",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hi there")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = chat_client(&server)
        .complete(&build_messages("Hello", None))
        .await
        .unwrap();
    assert_eq!(reply, "Hi there");
}

#[tokio::test]
async fn chat_status_codes_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let err = chat_client(&server)
        .complete(&build_messages("x", None))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        InvokeError::RateLimited {
            retry_after_secs: Some(7)
        }
    );
}

#[tokio::test]
async fn chat_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = chat_client(&server)
        .complete(&build_messages("x", None))
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Auth(ref m) if m.contains("invalid api key")));
}

#[tokio::test]
async fn chat_without_choices_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = chat_client(&server)
        .complete(&build_messages("x", None))
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::InvalidResponse(_)));
}

#[tokio::test]
async fn chat_stream_yields_deltas_until_done() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/v3/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let stream = chat_client(&server)
        .complete_stream(&build_messages("Say hello", None))
        .await
        .unwrap();
    let parts: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
    assert_eq!(parts, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn chat_batch_retries_and_keeps_prompt_order() {
    let server = MockServer::start().await;
    // The first call for "second" fails; wiremock serves mocks in mount
    // order until a mock's `up_to_n_times` budget runs out.
    Mock::given(method("POST"))
        .and(body_string_contains("second"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("one")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("two")))
        .mount(&server)
        .await;

    let config = BatchConfig::builder()
        .max_workers(2)
        .max_attempts(2)
        .backoff(Duration::from_millis(10))
        .build()
        .unwrap();
    let prompts = vec![
        Request::new("p1", ChatPrompt::new("first")),
        Request::new("p2", ChatPrompt::new("second")),
    ];

    let output = chat_batch(prompts, &chat_client(&server), &BatchInvoker::new(config)).await;

    assert_eq!(output.results[0].response().map(String::as_str), Some("one"));
    assert_eq!(output.results[1].response().map(String::as_str), Some("two"));
    assert_eq!(output.results[1].attempts, 2);
}

// ── OCR ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ocr_sends_signed_form_and_joins_lines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(query_param("Action", "OCRNormal"))
        .and(query_param("Version", "2020-08-26"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(header_exists("authorization"))
        .and(header_exists("x-date"))
        .and(header_exists("x-content-sha256"))
        .and(body_string_contains("image_base64=aGVsbG8%3D"))
        .and(body_string_contains("mode=default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 10000,
            "message": "Success",
            "data": {"line_texts": ["第一行", "", "second line"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = ocr_client(&server).recognize_bytes(b"hello").await.unwrap();
    assert_eq!(text, "第一行\nsecond line");
}

#[tokio::test]
async fn ocr_error_code_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 50411,
            "message": "Input image is invalid"
        })))
        .mount(&server)
        .await;

    let err = ocr_client(&server).recognize_bytes(b"x").await.unwrap_err();
    match err {
        InvokeError::Api { status, message } => {
            assert_eq!(status, 200);
            assert!(message.contains("Input image is invalid"), "got: {message}");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn ocr_url_mode_sends_image_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains(
            "image_url=https%3A%2F%2Fcdn.example.com%2Fdoc%2Fpage_2.png",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 10000,
            "data": {"line_texts": ["ok"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = OcrConfig::new("AK", "SK");
    config.host = server.uri();
    config.image_mode = ImageMode::Url;
    config.image_url_prefix = Some("https://cdn.example.com/doc".into());
    let client = OcrClient::new(config).unwrap();

    // The file is never read in URL mode.
    let text = client
        .recognize_path(std::path::Path::new("/nonexistent/page_2.png"))
        .await
        .unwrap();
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn ocr_server_error_is_retryable_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = ocr_client(&server).recognize_bytes(b"x").await.unwrap_err();
    assert!(matches!(err, InvokeError::Api { status: 502, .. }));
}

#[tokio::test]
async fn ocr_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", " 12 "))
        .mount(&server)
        .await;

    let err = ocr_client(&server).recognize_bytes(b"x").await.unwrap_err();
    assert_eq!(
        err,
        InvokeError::RateLimited {
            retry_after_secs: Some(12)
        }
    );
}
