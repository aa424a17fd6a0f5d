use futures::StreamExt;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use vlchat::{
    ConversationTurn, DecodeMode, EndpointRequest, GenerationParams, HttpEndpoint,
    InferenceEndpoint,
};
use vlchat_service::{AppState, Upstream, UpstreamConfig, router};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves the router on an ephemeral port and returns the `/api` URL.
async fn spawn_service(upstream: &MockServer) -> String {
    let upstream = Upstream::new(UpstreamConfig {
        base_url: format!("{}/v1", upstream.uri()),
        model: "MiniCPM-V".into(),
        api_key: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let app = router(AppState {
        upstream: Arc::new(upstream),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api", addr)
}

fn endpoint(url: &str) -> HttpEndpoint {
    HttpEndpoint::new(url, "MiniCPM-V", "trace-1", Duration::from_secs(5)).unwrap()
}

fn request(stream: bool) -> EndpointRequest {
    let turns = vec![
        ConversationTurn::user()
            .image("aW1hZ2U=")
            .text("what is this?")
            .build(),
    ];
    let params = GenerationParams::for_turn(DecodeMode::Sampling, false, stream, false);
    EndpointRequest::new(&turns, &params, Some("abcd")).unwrap()
}

#[tokio::test]
async fn single_shot_answer_is_sanitized() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "stream": false,
            "chat_template_kwargs": {"enable_thinking": false}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "A <ref>cat</ref><box>1 2 3 4</box>."}}],
            "usage": {"completion_tokens": 7}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let url = spawn_service(&upstream).await;
    let completion = endpoint(&url).chat(&request(false)).await.unwrap();
    assert_eq!(completion.result, "A cat.");
    assert_eq!(completion.output_tokens, Some(7));
}

#[tokio::test]
async fn upstream_failure_is_a_server_error() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;

    let url = spawn_service(&upstream).await;
    let err = endpoint(&url).chat(&request(false)).await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn malformed_question_is_rejected() {
    let upstream = MockServer::start().await;
    let url = spawn_service(&upstream).await;
    let mut bad = request(false);
    bad.question = "not json".into();
    let err = endpoint(&url).chat(&bad).await.unwrap_err();
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn stream_relays_cumulative_snapshots() {
    let upstream = MockServer::start().await;
    let body = [
        r#"{"choices":[{"delta":{"content":"It"}}]}"#,
        r#"{"choices":[{"delta":{"content":" is"}}]}"#,
        r#"{"choices":[{"delta":{"content":" a cat."}}]}"#,
        "[DONE]",
    ]
    .iter()
    .map(|l| format!("data: {}\n\n", l))
    .collect::<String>();
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&upstream)
        .await;

    let url = spawn_service(&upstream).await;
    let events = endpoint(&url)
        .chat_stream(&request(true))
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;
    let events = events.into_iter().map(Result::unwrap).collect::<Vec<_>>();

    let snapshots = events
        .iter()
        .map(|e| e.full_response.as_str())
        .collect::<Vec<_>>();
    assert_eq!(snapshots, vec!["It", "It is", "It is a cat.", "It is a cat."]);
    assert!(events.last().unwrap().finished);
    assert!(events[..3].iter().all(|e| !e.finished));
}

#[tokio::test]
async fn stream_open_failure_is_reported_before_events() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;

    let url = spawn_service(&upstream).await;
    assert!(endpoint(&url).chat_stream(&request(true)).await.is_err());
}
