//! HTTP surface tests driven through the axum router

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use switchboard_engine::channel::{BearerTokenCache, ChannelAdaptor, CHANNEL_SECRET_HEADER};
use switchboard_engine::config::ChannelConfig;
use switchboard_engine::secrets::SecretString;
use switchboard_engine::server::{router, AppState};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn converse(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/converse")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn call(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn state(server: &MockServer) -> (AppState, Harness) {
    let h = harness(server, HarnessOptions::default()).await;
    let state = AppState {
        pipeline: h.pipeline.clone(),
        channel: None,
    };
    (state, h)
}

#[tokio::test]
async fn test_converse_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(message_path("a")))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply(&["Hello!"], 0.8, json!({}))))
        .mount(&server)
        .await;
    let (state, _h) = state(&server).await;

    let body = json!({ "token": TOKEN, "text": "hi", "context": { "lang": "en" } });
    let (status, body) = call(state, converse(body.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status_code"], 200);
    assert_eq!(body["version"], "1.0");
    assert_eq!(body["response"], json!(["Hello!"]));
    assert_eq!(body["context"]["lang"], "en");
    assert!(body["user_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body["user_rev"].as_str().is_some_and(|rev| rev.starts_with("1-")));
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn test_converse_rejects_bad_token() {
    let server = MockServer::start().await;
    let (state, _h) = state(&server).await;

    let body = json!({ "token": "nope", "text": "hi" });
    let (status, body) = call(state, converse(body.to_string())).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status_code"], 401);
    assert_eq!(body["response"], json!([]));
}

#[tokio::test]
async fn test_converse_rejects_malformed_body() {
    let server = MockServer::start().await;
    let (state, _h) = state(&server).await;

    let (status, body) = call(state.clone(), converse("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status_code"], 400);

    let missing_text = json!({ "token": TOKEN }).to_string();
    let (status, _) = call(state, converse(missing_text)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let server = MockServer::start().await;
    let (state, _h) = state(&server).await;

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_channel_route_absent_without_channel() {
    let server = MockServer::start().await;
    let (state, _h) = state(&server).await;

    let request = Request::builder()
        .method("POST")
        .uri("/channel/events")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "type": "add" }).to_string()))
        .unwrap();
    let (status, _) = call(state, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn channel_event(secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/channel/events")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(CHANNEL_SECRET_HEADER, secret);
    }
    builder
        .body(Body::from(json!({ "type": "add" }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_channel_route_requires_verification_secret() {
    let server = MockServer::start().await;
    let (mut state, h) = state(&server).await;
    let config = ChannelConfig {
        service_url: Some(server.uri()),
        ..Default::default()
    };
    let client = reqwest::Client::new();
    let tokens = BearerTokenCache::new(client.clone(), &config, None);
    let adaptor = ChannelAdaptor::new(
        Arc::clone(&h.pipeline),
        tokens,
        client,
        &config,
        Some(SecretString::new("inbound-secret")),
    )
    .unwrap();
    state.channel = Some(Arc::new(adaptor));

    let (status, _) = call(state.clone(), channel_event(None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(state.clone(), channel_event(Some("guess"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(state, channel_event(Some("inbound-secret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status_code"], 200);
}
