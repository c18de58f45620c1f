//! HTTP integration tests for the Replyflow REST API
//!
//! Requests go through the full Axum router via `oneshot`. The generation
//! backend is a wiremock server speaking the chat-completion protocol, so no
//! test touches the network beyond localhost.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use replyflow_core::config::FallbackConfig;
use replyflow_core::{ChatCompletionClient, ReplyflowConfig, ResponseResolver};
use replyflow_server::http::{build_router, HttpState};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(timeout_ms: u64) -> ReplyflowConfig {
    let mut config = ReplyflowConfig::default();
    config.generation.api_key = Some("sk-test".to_string());
    config.generation.timeout_ms = timeout_ms;
    config
}

/// Router wired to a mock upstream
fn make_app(server: &MockServer, timeout_ms: u64) -> Router {
    let config = test_config(timeout_ms);
    let client = ChatCompletionClient::with_base_url(config.generation.clone(), server.uri())
        .expect("client builds");
    let resolver = ResponseResolver::builder(config)
        .generator(Arc::new(client))
        .build()
        .expect("resolver builds");

    build_router(Arc::new(HttpState {
        resolver: Arc::new(resolver),
    }))
}

async fn mount_completion(server: &MockServer, content: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn webhook_body(text: &str) -> serde_json::Value {
    json!({
        "responseId": "r-1",
        "session": "projects/american-store/agent/sessions/s-1",
        "queryResult": {
            "queryText": text,
            "parameters": {},
            "intent": { "displayName": "Default Fallback Intent" },
            "languageCode": "es"
        }
    })
}

// ===========================================================================
// GET /health and /version
// ===========================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = MockServer::start().await;
    let app = make_app(&server, 2000);

    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["generation"], "enabled");
    assert!(json["knowledge_entries"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_version_endpoint() {
    let server = MockServer::start().await;
    let app = make_app(&server, 2000);

    let (status, json) = send(&app, get("/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["version"].is_string());
    assert_eq!(json["protocol"], "replyflow/1");
}

// ===========================================================================
// POST /webhook
// ===========================================================================

#[tokio::test]
async fn test_webhook_greeting_answered_from_knowledge() {
    let server = MockServer::start().await;
    mount_completion(&server, "unused", 0).await;
    let app = make_app(&server, 2000);

    let (status, json) = send(&app, post_json("/webhook", webhook_body("Hola"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["fulfillmentText"],
        "¡Bienvenido a American Store! ¿Quieres conocer nuestras ofertas o productos?"
    );
    assert_eq!(json["source"], "replyflow:knowledge");
}

#[tokio::test]
async fn test_webhook_generated_then_cached() {
    let server = MockServer::start().await;
    mount_completion(&server, "Envío $12.000, 1-3 días", 1).await;
    let app = make_app(&server, 2000);

    let (status, first) = send(&app, post_json("/webhook", webhook_body("cuánto cuesta el envío"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["fulfillmentText"], "Envío $12.000, 1-3 días");
    assert_eq!(first["source"], "replyflow:generated");
    assert_eq!(first["fulfillmentMessages"][0]["text"]["text"][0], "Envío $12.000, 1-3 días");

    let (status, second) = send(&app, post_json("/webhook", webhook_body("Cuánto cuesta   el envío"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["fulfillmentText"], "Envío $12.000, 1-3 días");
    assert_eq!(second["source"], "replyflow:cache");
}

#[tokio::test]
async fn test_webhook_upstream_error_still_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    let app = make_app(&server, 2000);

    let (status, json) = send(&app, post_json("/webhook", webhook_body("tienen gorras?"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fulfillmentText"], FallbackConfig::default().unavailable.as_str());
    assert_eq!(json["source"], "replyflow:fallback");
}

#[tokio::test]
async fn test_webhook_slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "choices": [{ "message": { "content": "tarde" } }] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let app = make_app(&server, 300);

    let started = std::time::Instant::now();
    let (status, json) = send(&app, post_json("/webhook", webhook_body("tienen gorras?"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fulfillmentText"], FallbackConfig::default().timeout.as_str());
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_webhook_malformed_body_still_200() {
    let server = MockServer::start().await;
    mount_completion(&server, "unused", 0).await;
    let app = make_app(&server, 2000);

    let req = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from("{\"queryResult\": "))
        .unwrap();

    let (status, json) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fulfillmentText"], FallbackConfig::default().invalid_input.as_str());
}

// ===========================================================================
// POST /resolve
// ===========================================================================

#[tokio::test]
async fn test_resolve_with_brand_parameter() {
    let server = MockServer::start().await;
    mount_completion(&server, "unused", 0).await;
    let app = make_app(&server, 2000);

    let (status, json) = send(
        &app,
        post_json(
            "/resolve",
            json!({
                "utterance": "¿Tienen Carolina Herrera?",
                "intent": "Consulta_Marca",
                "parameters": { "marca": "Carolina Herrera" }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["source"], "knowledge");
    assert!(json["text"].as_str().unwrap().contains("Carolina Herrera"));
    assert!(json["latency_ms"].is_number());
}

#[tokio::test]
async fn test_resolve_missing_utterance_is_400() {
    let server = MockServer::start().await;
    let app = make_app(&server, 2000);

    let (status, json) = send(&app, post_json("/resolve", json!({ "intent": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");

    let (status, _) = send(&app, post_json("/resolve", json!({ "utterance": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// Cache endpoints
// ===========================================================================

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let server = MockServer::start().await;
    mount_completion(&server, "Sí, tenemos gorras.", 2).await;
    let app = make_app(&server, 2000);

    let ask = || post_json("/resolve", json!({ "utterance": "tienen gorras?" }));

    let (_, first) = send(&app, ask()).await;
    assert_eq!(first["source"], "generated");

    let (status, stats) = send(&app, get("/cache/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["misses"], 1);

    let clear = Request::builder()
        .method("DELETE")
        .uri("/cache")
        .body(Body::empty())
        .unwrap();
    let (status, cleared) = send(&app, clear).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["cleared"], 1);

    // cleared cache means the upstream is asked again
    let (_, again) = send(&app, ask()).await;
    assert_eq!(again["source"], "generated");
}
