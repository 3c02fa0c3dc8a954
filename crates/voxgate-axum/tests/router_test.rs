//! Router-level integration tests: health, auth, and the non-streaming
//! chat endpoint against loopback providers.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use tower::ServiceExt;

use voxgate_axum::{Claims, GatewayOptions, build_router};
use voxgate_core::TimeoutConfig;
use voxgate_core::provider::{
    LoopbackTextProvider, ModelConfig, ModelRegistry, ProviderRegistry, TextCapabilities,
};
use voxgate_core::workflow::WorkflowDeps;

const SECRET: &str = "router-test-secret";

fn router() -> Router {
    let mut providers = ProviderRegistry::new();
    providers
        .register_text("loopback", Arc::new(LoopbackTextProvider::new()))
        .unwrap();
    let mut models = ModelRegistry::new();
    models
        .register(ModelConfig {
            alias: "m1".into(),
            provider_key: "loopback".into(),
            model_name: "loopback-mini".into(),
            capabilities: TextCapabilities::default(),
            max_context_tokens: None,
            max_output_tokens: None,
        })
        .unwrap();

    let deps = Arc::new(WorkflowDeps {
        providers: Arc::new(providers),
        models: Arc::new(models),
        store: None,
        timeouts: TimeoutConfig::default(),
    });
    build_router(
        deps,
        &GatewayOptions {
            auth_secret: SECRET.into(),
            queue_capacity: 64,
            max_connections: 16,
            keepalive: Duration::from_secs(30),
            blob_root: None,
        },
    )
}

fn bearer() -> String {
    let claims = Claims {
        sub: "cust-http".into(),
        exp: usize::try_from(chrono::Utc::now().timestamp() + 3600).unwrap(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

#[tokio::test]
async fn health_endpoint_responds() {
    let response = router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_requires_bearer_auth() {
    let body = r#"{"prompt":"hello","settings":{"text":{"model":"m1"}}}"#;
    let response = router()
        .oneshot(
            Request::post("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_collects_a_full_response() {
    let body = r#"{"prompt":"echo me","settings":{"text":{"model":"m1"}}}"#;
    let response = router()
        .oneshot(
            Request::post("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, bearer())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["success"], true);
    assert_eq!(parsed["data"]["text"], "echo me");
    assert_eq!(parsed["data"]["model"], "m1");
    assert_eq!(parsed["data"]["requires_tool_action"], false);
}

#[tokio::test]
async fn unknown_model_surfaces_as_failed_response() {
    let body = r#"{"prompt":"hi","settings":{"text":{"model":"missing"}}}"#;
    let response = router()
        .oneshot(
            Request::post("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, bearer())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    // The workflow runs; the failure arrives in the collected body, not as
    // an HTTP error.
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["success"], false);
}

#[tokio::test]
async fn sse_stream_emits_event_frames() {
    let body = r#"{"request_type":"text","prompt":"stream me",
                   "settings":{"text":{"model":"m1"},"tts":{"tts_auto_execute":false}}}"#;
    let response = router()
        .oneshot(
            Request::post("/chat/stream")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, bearer())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("data: "));
    assert!(text.contains("\"type\":\"text_completed\""));
    assert!(text.contains("\"type\":\"tts_not_requested\""));
}
