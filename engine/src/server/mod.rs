//! HTTP surface
//!
//! # Endpoints
//!
//! - POST /converse - Run one conversation turn
//! - POST /channel/events - Platform events for the channel adaptor (when configured)
//! - GET /health - Liveness and build information

use crate::channel::{ChannelAdaptor, ChannelEvent, CHANNEL_SECRET_HEADER};
use crate::pipeline::Pipeline;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sdk::errors::RouterError;
use sdk::types::ConverseRequest;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub channel: Option<Arc<ChannelAdaptor>>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/converse", post(converse_handler))
        .route("/health", get(health_handler));

    if state.channel.is_some() {
        app = app.route("/channel/events", post(channel_handler));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn converse_handler(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Response {
    // Malformed bodies get the same 400 shape as missing fields
    let request: ConverseRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let err = RouterError::BadRequest(e.to_string());
            tracing::warn!("Unparsable converse request: {}", err);
            let response = sdk::types::ConverseResponse::rejected(&err);
            return (status(response.status_code), Json(response)).into_response();
        }
    };

    let response = state.pipeline.handle(request).await;
    (status(response.status_code), Json(response)).into_response()
}

async fn channel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let Some(channel) = state.channel.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let secret = headers
        .get(CHANNEL_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if !channel.verify(secret) {
        tracing::warn!("Rejected channel event with missing or invalid verification secret");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "status_code": 401 }))).into_response();
    }

    let event: ChannelEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Unparsable channel event: {}", e);
            return (StatusCode::BAD_REQUEST, Json(json!({ "status_code": 400 }))).into_response();
        }
    };

    let ack = channel.handle_event(secret, event).await;
    (status(ack.status_code), Json(ack)).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GIT_COMMIT_HASH"),
        "built_at": env!("BUILD_TIMESTAMP"),
    }))
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), RouterError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RouterError::Network(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RouterError::Network(format!("Server error: {}", e)))
}
