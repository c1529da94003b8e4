//! Integration tests for the HTTP dialogue backend against a mock server

use sdk::types::UserContext;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard_engine::backend::{BackendError, DialogueBackend, HttpDialogueBackend};
use switchboard_engine::secrets::{CredentialCache, CredentialStore};
use wiremock::matchers::{basic_auth, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(base_url: String, credential: &str) -> HttpDialogueBackend {
    let credentials = Arc::new(CredentialCache::new(Arc::new(CredentialStore::new(
        "switchboard-test",
    ))));
    credentials.insert("cred", credential);
    HttpDialogueBackend::new(base_url, Duration::from_secs(5), credentials).unwrap()
}

#[tokio::test]
async fn test_send_posts_text_and_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workspaces/ws-1/message"))
        .and(basic_auth("apikey", "s3cret"))
        .and(body_json(json!({
            "input": { "text": "I want a pizza" },
            "context": { "city": "Rome" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": { "text": ["Which size?", ""] },
            "intents": [
                { "intent": "order", "confidence": 0.92 },
                { "intent": "greet", "confidence": 0.05 },
            ],
            "entities": [{ "entity": "food", "value": "pizza", "confidence": 0.7 }],
            "context": { "city": "Rome", "step": "size" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(server.uri(), "apikey:s3cret");
    let context = UserContext::new().with("city", json!("Rome"));
    let reply = backend
        .send("cred", "ws-1", &context, "I want a pizza")
        .await
        .unwrap();

    assert_eq!(reply.text, vec!["Which size?".to_string(), String::new()]);
    assert!((reply.top_intent_confidence() - 0.92).abs() < f64::EPSILON);
    assert!((reply.top_entity_confidence() - 0.7).abs() < f64::EPSILON);
    assert_eq!(reply.context.get_str("step"), Some("size"));
    assert_eq!(reply.spawned_conversation_id(), None);
}

#[tokio::test]
async fn test_credential_url_overrides_base_url() {
    let configured = MockServer::start().await;
    let dedicated = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workspaces/ws-2/message"))
        .and(basic_auth("svc", "pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": { "text": ["dedicated"] },
            "context": { "conversation_id": "conv-9" },
        })))
        .expect(1)
        .mount(&dedicated)
        .await;

    let credential = json!({
        "url": dedicated.uri(),
        "username": "svc",
        "password": "pw",
    })
    .to_string();
    let backend = backend(configured.uri(), &credential);

    let reply = backend
        .send("cred", "ws-2", &UserContext::new(), "hi")
        .await
        .unwrap();
    assert_eq!(reply.text, vec!["dedicated".to_string()]);
    assert!(reply.intents.is_empty());
    assert_eq!(reply.top_intent_confidence(), 0.0);
    assert_eq!(reply.spawned_conversation_id().as_deref(), Some("conv-9"));
    assert!(configured.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_error_statuses_are_mapped() {
    let server = MockServer::start().await;
    for (workspace, status) in [("auth", 401), ("bad", 422), ("down", 503)] {
        Mock::given(method("POST"))
            .and(path(format!("/workspaces/{}/message", workspace)))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;
    }

    let backend = backend(server.uri(), "apikey:pw");
    let ctx = UserContext::new();

    let err = backend.send("cred", "auth", &ctx, "x").await.unwrap_err();
    assert!(matches!(err, BackendError::AuthenticationFailed(_)));

    let err = backend.send("cred", "bad", &ctx, "x").await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));

    let err = backend.send("cred", "down", &ctx, "x").await.unwrap_err();
    assert!(matches!(err, BackendError::Unavailable(_)));

    let routed = err.for_target("u1:a");
    assert!(routed.to_string().contains("u1:a"));
}

#[tokio::test]
async fn test_unparsable_reply_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let backend = backend(server.uri(), "apikey:pw");
    let err = backend
        .send("cred", "ws", &UserContext::new(), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ParseError(_)));
}

#[tokio::test]
async fn test_malformed_credential_never_reaches_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let backend = backend(server.uri(), "no-separator");
    let err = backend
        .send("cred", "ws", &UserContext::new(), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Credential(_)));
    assert!(!backend.check_health("cred").await);
}

#[tokio::test]
async fn test_check_health_with_resolvable_credential() {
    let server = MockServer::start().await;
    let backend = backend(server.uri(), "apikey:pw");
    assert!(backend.check_health("cred").await);
    assert_eq!(backend.name(), "http");
}
