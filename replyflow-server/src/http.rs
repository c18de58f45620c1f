//! Replyflow HTTP API
//!
//! Axum-based HTTP server that fronts the response resolver.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum
//! dispatch machinery.
//!
//! Endpoints:
//! - `POST /webhook`: Dialogflow fulfillment (always answers 200)
//! - `POST /resolve`: plain JSON resolution
//! - `GET /health`: resolver status
//! - `GET /version`: server version info
//! - `GET /cache/stats`: response cache statistics
//! - `DELETE /cache`: flush the response cache

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use replyflow_core::{Parameters, ReplyflowConfig, ResponseResolver, Utterance};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::dialogflow::{WebhookRequest, WebhookResponse};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub resolver: Arc<ResponseResolver>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/resolve", post(resolve_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/cache/stats", get(cache_stats_handler))
        .route("/cache", delete(cache_clear_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    resolver: Arc<ResponseResolver>,
    config: &ReplyflowConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { resolver });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Replyflow HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ResolveRequest {
    pub utterance: Option<String>,
    pub intent: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    pub context: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner webhook: never fails. Unreadable bodies are treated as an empty
/// turn so the platform still receives the invalid-input reply.
pub async fn webhook_inner(resolver: &ResponseResolver, body: &[u8]) -> (StatusCode, serde_json::Value) {
    let request: WebhookRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable webhook body, answering with fallback");
            WebhookRequest::default()
        }
    };

    let session = request
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let response_id = request.response_id.as_deref().unwrap_or("-");
    let utterance = request.to_utterance();

    let result = resolver
        .resolve(&utterance)
        .instrument(tracing::info_span!("webhook", session = %session, response_id = %response_id))
        .await;

    let body = serde_json::to_value(WebhookResponse::from_result(&result)).unwrap_or_else(|_| {
        serde_json::json!({ "fulfillmentText": result.text })
    });

    (StatusCode::OK, body)
}

/// Inner resolve: validates the utterance and returns the resolution result.
pub async fn resolve_inner(resolver: &ResponseResolver, req: ResolveRequest) -> (StatusCode, serde_json::Value) {
    let text = match req.utterance {
        Some(u) if !u.trim().is_empty() => u,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "utterance field is required",
                    "status": "error",
                }),
            );
        }
    };

    let mut utterance = Utterance::new(text).with_parameters(req.parameters);
    if let Some(intent) = req.intent {
        utterance = utterance.with_intent(intent);
    }
    if let Some(context) = req.context {
        utterance = utterance.with_context(context);
    }

    let result = resolver
        .resolve(&utterance)
        .instrument(tracing::info_span!("resolve", request_id = %uuid::Uuid::new_v4()))
        .await;

    match serde_json::to_value(&result) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "error": e.to_string(),
                "status": "error",
            }),
        ),
    }
}

/// Inner health: resolver status (pure, no IO).
pub fn health_inner(resolver: &ResponseResolver) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "generation": if resolver.has_generator() { "enabled" } else { "disabled" },
            "knowledge_entries": resolver.knowledge_entries(),
            "cache_entries": resolver.cache_stats().entries,
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "replyflow/1",
    })
}

pub fn cache_stats_inner(resolver: &ResponseResolver) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(resolver.cache_stats()) {
        Ok(stats) => (StatusCode::OK, stats),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "error": e.to_string(),
                "status": "error",
            }),
        ),
    }
}

pub fn cache_clear_inner(resolver: &ResponseResolver) -> (StatusCode, serde_json::Value) {
    let cleared = resolver.cache_stats().entries;
    resolver.clear_cache();
    (
        StatusCode::OK,
        serde_json::json!({
            "cleared": cleared,
            "status": "ok",
        }),
    )
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn webhook_handler(State(state): State<Arc<HttpState>>, body: Bytes) -> impl IntoResponse {
    let (status, body) = webhook_inner(&state.resolver, &body).await;
    (status, Json(body))
}

pub async fn resolve_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    let (status, body) = resolve_inner(&state.resolver, req).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.resolver);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn cache_stats_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = cache_stats_inner(&state.resolver);
    (status, Json(body))
}

pub async fn cache_clear_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = cache_clear_inner(&state.resolver);
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
