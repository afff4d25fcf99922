//! Embedding and chat providers against a mock HTTP server.

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use docgrok::chat::{ChatClient, OpenAIChat};
use docgrok::embedding::{embed_texts, BatchOptions, Embedder, OllamaEmbedder, OpenAIEmbedder};
use docgrok::error::ApiError;
use docgrok::models::{ChatMessage, Role};
use docgrok::retry::RetryPolicy;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

fn inputs(request: &Request) -> Vec<String> {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    body["input"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

/// OpenAI-style responder embedding `text-N` as `[N]`, listed in reverse
/// order so clients must sort by `index`.
struct ReversedEmbeddings;

impl Respond for ReversedEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let data: Vec<Value> = inputs(request)
            .iter()
            .enumerate()
            .rev()
            .map(|(index, text)| {
                let n: f32 = text.trim_start_matches("text-").parse().unwrap();
                json!({ "index": index, "embedding": [n] })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
    }
}

fn openai_embedder(server: &MockServer, retry: RetryPolicy) -> OpenAIEmbedder {
    OpenAIEmbedder::new(
        "test-key".to_string(),
        &server.uri(),
        "text-embedding-3-small".to_string(),
        TIMEOUT,
        retry,
    )
    .unwrap()
}

#[tokio::test]
async fn test_openai_batches_and_reorders() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ReversedEmbeddings)
        .expect(3)
        .mount(&server)
        .await;

    let embedder = openai_embedder(&server, fast_retry());
    let texts: Vec<String> = (0..250).map(|i| format!("text-{}", i)).collect();
    let options = BatchOptions {
        batch_size: 100,
        concurrency: 2,
    };
    let vectors = embed_texts(&embedder, &texts, &options).await.unwrap();

    assert_eq!(vectors.len(), 250);
    for (i, v) in vectors.iter().enumerate() {
        assert_eq!(v, &vec![i as f32]);
    }

    let requests = server.received_requests().await.unwrap();
    let mut sizes: Vec<usize> = requests.iter().map(|r| inputs(r).len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![50, 100, 100]);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ReversedEmbeddings)
        .mount(&server)
        .await;

    let embedder = openai_embedder(&server, fast_retry());
    let vectors = embedder
        .embed_batch(&["text-7".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![7.0]]);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ReversedEmbeddings)
        .mount(&server)
        .await;

    let embedder = openai_embedder(&server, fast_retry());
    let vectors = embedder.embed_batch(&["text-1".to_string()]).await.unwrap();
    assert_eq!(vectors, vec![vec![1.0]]);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_client_error_fails_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = openai_embedder(&server, fast_retry());
    let err = embedder
        .embed_batch(&["text-1".to_string()])
        .await
        .unwrap_err();
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Status { status, body, .. }) => {
            assert_eq!(status.as_u16(), 400);
            assert!(body.contains("bad input"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let embedder = openai_embedder(&server, RetryPolicy::new(2, Duration::from_millis(1)));
    assert!(embedder.embed_batch(&["text-1".to_string()]).await.is_err());
}

#[tokio::test]
async fn test_ollama_embeds_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(
        &server.uri(),
        "nomic-embed-text".to_string(),
        TIMEOUT,
        fast_retry(),
    )
    .unwrap();
    assert_eq!(embedder.model_name(), "nomic-embed-text");
    let vectors = embedder
        .embed_batch(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn test_chat_completion_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer chat-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini-2024",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "Forty-two." } }
            ],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let chat =
        OpenAIChat::new("chat-key".to_string(), &server.uri(), TIMEOUT, fast_retry()).unwrap();
    let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("answer?")];
    let response = chat.complete("gpt-4o-mini", &messages).await.unwrap();

    assert_eq!(response.content(), "Forty-two.");
    assert_eq!(response.message.role, Role::Assistant);
    assert_eq!(response.model, "gpt-4o-mini-2024");
    assert_eq!(response.usage.total_tokens, 15);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "answer?");
}

#[tokio::test]
async fn test_chat_without_choices_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let chat =
        OpenAIChat::new("k".to_string(), &server.uri(), TIMEOUT, RetryPolicy::none()).unwrap();
    let err = chat
        .complete("gpt-4o", &[ChatMessage::user("hi")])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ApiError>(),
        Some(ApiError::EmptyResponse { .. })
    ));
}
